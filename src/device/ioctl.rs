/*!
 * Device Control Requests
 *
 * The ioctl table the geometry queries draw from, and the trait that
 * abstracts issuing it against an open device.
 */

use nix::ioctl_read_bad;
use serde::{Deserialize, Serialize};
use std::os::fd::{AsRawFd, BorrowedFd};

/// Linux: device size in bytes
pub const BLKGETSIZE64: u32 = 0x8008_1272;
/// BSD: media size in bytes
pub const DIOCGMEDIASIZE: u32 = 0x4008_6481;
/// BSD: sector size in bytes
pub const DIOCGSECTORSIZE: u32 = 0x4004_6480;
/// BSD: firmware sectors per track
pub const DIOCGFWSECTORS: u32 = 0x4004_6482;
/// BSD: firmware head count
pub const DIOCGFWHEADS: u32 = 0x4004_6483;

/// Supported device control requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceRequest {
    BlockSize64 = BLKGETSIZE64,
    MediaSize = DIOCGMEDIASIZE,
    SectorSize = DIOCGSECTORSIZE,
    FirmwareSectors = DIOCGFWSECTORS,
    FirmwareHeads = DIOCGFWHEADS,
}

impl DeviceRequest {
    /// Native request code
    #[inline]
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Whether the request returns a 64-bit value
    #[inline]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::BlockSize64 | Self::MediaSize)
    }
}

/// Issues device control requests
///
/// Every failure (unsupported request, not a device, bad descriptor)
/// surfaces as `None`; callers fall back or give up.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceControl {
    /// Issue a request returning a 64-bit value
    fn read_u64(&self, request: DeviceRequest) -> Option<u64>;

    /// Issue a request returning a 32-bit value
    fn read_u32(&self, request: DeviceRequest) -> Option<u32>;
}

ioctl_read_bad!(blk_get_size64, BLKGETSIZE64, u64);
ioctl_read_bad!(diocg_media_size, DIOCGMEDIASIZE, i64);
ioctl_read_bad!(diocg_sector_size, DIOCGSECTORSIZE, u32);
ioctl_read_bad!(diocg_fw_sectors, DIOCGFWSECTORS, u32);
ioctl_read_bad!(diocg_fw_heads, DIOCGFWHEADS, u32);

type IoctlFn<T> = unsafe fn(libc::c_int, *mut T) -> nix::Result<libc::c_int>;

/// Device control against an open descriptor
#[derive(Debug, Clone, Copy)]
pub struct RawDevice<'fd> {
    fd: BorrowedFd<'fd>,
}

impl<'fd> RawDevice<'fd> {
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self { fd }
    }

    fn call<T: Default>(&self, ioctl: IoctlFn<T>) -> Option<T> {
        let mut value = T::default();
        // SAFETY: every request in the table writes exactly one T through
        // the pointer, which is valid for the duration of the call
        unsafe { ioctl(self.fd.as_raw_fd(), &mut value) }.ok()?;
        Some(value)
    }
}

impl DeviceControl for RawDevice<'_> {
    fn read_u64(&self, request: DeviceRequest) -> Option<u64> {
        match request {
            DeviceRequest::BlockSize64 => self.call(blk_get_size64),
            DeviceRequest::MediaSize => self
                .call(diocg_media_size)
                .and_then(|size| u64::try_from(size).ok()),
            _ => None,
        }
    }

    fn read_u32(&self, request: DeviceRequest) -> Option<u32> {
        match request {
            DeviceRequest::SectorSize => self.call(diocg_sector_size),
            DeviceRequest::FirmwareSectors => self.call(diocg_fw_sectors),
            DeviceRequest::FirmwareHeads => self.call(diocg_fw_heads),
            _ => None,
        }
    }
}
