use crate::image::Image;

pub mod create;
pub mod info;
pub mod insert;
pub mod partitions;

pub trait Action<T, E> {
    fn invoke(image: &mut Image, args: T) -> Result<(), E>;
}
