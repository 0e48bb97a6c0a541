/*!
 * Device Module
 * Block device size and geometry through device control requests
 */

mod geometry;
mod ioctl;

pub use geometry::{disk_geometry, disk_size, query_geometry, query_size, DiskGeometry, MediaType};
pub use ioctl::{
    DeviceControl, DeviceRequest, RawDevice, BLKGETSIZE64, DIOCGFWHEADS, DIOCGFWSECTORS,
    DIOCGMEDIASIZE, DIOCGSECTORSIZE,
};
