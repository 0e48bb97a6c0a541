/*!
 * Disk Geometry
 *
 * Size and geometry queries over the device control table. Each query
 * tries a fixed sequence of requests; the size query takes the first
 * answer, the geometry query needs every answer. Nothing is retried,
 * cached or logged.
 */

use super::ioctl::{DeviceControl, DeviceRequest, RawDevice};
use serde::{Deserialize, Serialize};
use std::os::fd::BorrowedFd;

/// Kind of medium behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Unknown,
    RemovableMedia,
    FixedMedia,
}

/// Physical layout reported by the device firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskGeometry {
    pub heads: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
    pub media_type: MediaType,
}

impl DiskGeometry {
    /// Firmware sector count (sectors per track)
    #[inline]
    pub fn sector_count(&self) -> u32 {
        self.sectors_per_track
    }

    #[inline]
    pub fn bytes_per_track(&self) -> u64 {
        u64::from(self.sectors_per_track) * u64::from(self.bytes_per_sector)
    }
}

/// Size order: Linux block size first, then BSD media size
const SIZE_REQUESTS: [DeviceRequest; 2] = [DeviceRequest::BlockSize64, DeviceRequest::MediaSize];

/// Device size in bytes, or `None` if no request is supported
pub fn query_size<D: DeviceControl + ?Sized>(device: &D) -> Option<u64> {
    SIZE_REQUESTS
        .iter()
        .find_map(|request| device.read_u64(*request))
}

/// Device geometry, or `None` unless sector size, firmware sectors and
/// firmware heads are all reported
pub fn query_geometry<D: DeviceControl + ?Sized>(device: &D) -> Option<DiskGeometry> {
    let bytes_per_sector = device.read_u32(DeviceRequest::SectorSize)?;
    let sectors_per_track = device.read_u32(DeviceRequest::FirmwareSectors)?;
    let heads = device.read_u32(DeviceRequest::FirmwareHeads)?;

    Some(DiskGeometry {
        heads,
        sectors_per_track,
        bytes_per_sector,
        media_type: MediaType::FixedMedia,
    })
}

/// [`query_size`] against an open descriptor
pub fn disk_size(fd: BorrowedFd<'_>) -> Option<u64> {
    query_size(&RawDevice::new(fd))
}

/// [`query_geometry`] against an open descriptor
pub fn disk_geometry(fd: BorrowedFd<'_>) -> Option<DiskGeometry> {
    query_geometry(&RawDevice::new(fd))
}
