use std::fmt::Display;

/// An 11-byte, space-padded 8.3 name as stored in a directory entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShortName([u8; 11]);

const SPECIAL: &[u8] = b"!#$%&'()-@^_`{}~";

fn is_legal(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || SPECIAL.contains(&c)
}

impl ShortName {
    pub const DOT: ShortName = ShortName(*b".          ");
    pub const DOT_DOT: ShortName = ShortName(*b"..         ");

    /// Upper-cases `name` and splits it at the last `.`; `None` when it does
    /// not fit 8.3 or uses characters a short name cannot hold.
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let (base, ext) = match upper.rsplit_once('.') {
            Some((base, ext)) => (base, ext),
            None => (upper.as_str(), ""),
        };

        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return None;
        }
        if !base.bytes().chain(ext.bytes()).all(is_legal) {
            return None;
        }

        let mut raw = [b' '; 11];
        raw[..base.len()].copy_from_slice(base.as_bytes());
        raw[8..8 + ext.len()].copy_from_slice(ext.as_bytes());

        Some(ShortName(raw))
    }

    pub fn from_raw(raw: [u8; 11]) -> Self {
        ShortName(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }

    /// Slot never used; also ends the directory.
    pub fn is_free(&self) -> bool {
        self.0[0] == 0x00
    }

    pub fn is_deleted(&self) -> bool {
        self.0[0] == 0xe5
    }
}

impl Display for ShortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base = String::from_utf8_lossy(&self.0[..8]);
        let ext = String::from_utf8_lossy(&self.0[8..]);
        let (base, ext) = (base.trim_end(), ext.trim_end());

        if ext.is_empty() {
            write!(f, "{}", base)
        } else {
            write!(f, "{}.{}", base, ext)
        }
    }
}

impl std::fmt::Debug for ShortName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::ShortName;

    #[test]
    fn pads_base_and_extension() {
        assert_eq!(ShortName::parse("EFI").unwrap().as_bytes(), b"EFI        ");
        assert_eq!(
            ShortName::parse("bootx64.efi").unwrap().as_bytes(),
            b"BOOTX64 EFI"
        );
        assert_eq!(ShortName::parse("A.B").unwrap().as_bytes(), b"A       B  ");
        assert_eq!(ShortName::parse("KERNEL.").unwrap().as_bytes(), b"KERNEL     ");
        assert_eq!(ShortName::parse("bootx64.efi").unwrap().to_string(), "BOOTX64.EFI");
    }

    #[test]
    fn rejects_long_or_illegal_names() {
        assert!(ShortName::parse("").is_none());
        assert!(ShortName::parse(".hidden").is_none());
        assert!(ShortName::parse("NINECHARS").is_none());
        assert!(ShortName::parse("FILE.TEXT").is_none());
        assert!(ShortName::parse("A B").is_none());
        assert!(ShortName::parse("A.B.C").is_none());
        assert!(ShortName::parse("grub*").is_none());
        assert!(ShortName::parse(".").is_none());
        assert!(ShortName::parse("..").is_none());
    }
}
