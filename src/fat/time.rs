use chrono::{Datelike, Local, Timelike};

/// Packed FAT date and time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FatTimestamp {
    pub time: u16,
    pub date: u16,
}

impl FatTimestamp {
    pub fn now() -> Self {
        Self::from_datetime(&Local::now())
    }

    /// Dates outside 1980..=2107 clamp to the nearest representable day.
    pub fn from_datetime<T>(dt: &T) -> Self
    where
        T: Datelike + Timelike,
    {
        let (year, month, day) = match dt.year() {
            y if y < 1980 => (1980, 1, 1),
            y if y > 2107 => (2107, 12, 31),
            y => (y, dt.month(), dt.day()),
        };

        // chrono reports a leap second as 59 plus extra nanoseconds.
        let second = dt.second();

        FatTimestamp {
            date: (((year - 1980) as u16) << 9) | ((month as u16) << 5) | day as u16,
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (second / 2) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FatTimestamp;
    use chrono::{NaiveDate, Timelike};

    #[test]
    fn packs_date_and_time() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let stamp = FatTimestamp::from_datetime(&dt);

        assert_eq!(stamp.date, (44 << 9) | (3 << 5) | 17);
        assert_eq!(stamp.time, (13 << 11) | (45 << 5) | 15);
    }

    #[test]
    fn clamps_out_of_range_years() {
        let early = NaiveDate::from_ymd_opt(1970, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert_eq!(FatTimestamp::from_datetime(&early).date, (1 << 5) | 1);
    }

    #[test]
    fn leap_second_packs_into_last_slot() {
        let dt = NaiveDate::from_ymd_opt(2016, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 59, 1500)
            .unwrap();

        assert_eq!(dt.second(), 59);
        assert_eq!(FatTimestamp::from_datetime(&dt).time & 0x1f, 29);
    }
}
