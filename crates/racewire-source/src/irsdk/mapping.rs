//! Read-only view of the sim's named memory map.
#![allow(unsafe_code)]

use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_READ,
    MEMORY_MAPPED_VIEW_ADDRESS,
};

use super::{ImageSource, MEM_MAP_NAME, MEM_MAP_SIZE};
use crate::errors::{Result, SourceError};

pub(super) struct LiveMapping {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
}

// The view is only ever read, and the handle is owned by this value.
unsafe impl Send for LiveMapping {}

impl LiveMapping {
    pub(super) fn open() -> Result<Self> {
        let wide: Vec<u16> = OsStr::new(MEM_MAP_NAME)
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR(wide.as_ptr())) }
            .map_err(|_| SourceError::NotRunning)?;

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_READ, 0, 0, MEM_MAP_SIZE) };
        if view.Value.is_null() {
            unsafe {
                let _ = CloseHandle(handle);
            }
            return Err(SourceError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self { handle, view })
    }
}

impl ImageSource for LiveMapping {
    fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.view.Value as *const u8, MEM_MAP_SIZE) }
    }
}

impl Drop for LiveMapping {
    fn drop(&mut self) {
        unsafe {
            let _ = UnmapViewOfFile(self.view);
            let _ = CloseHandle(self.handle);
        }
    }
}
