//! Types shared with C callers. Layouts mirror `include/meshmind/core.h`.

use std::ffi::CString;
use std::os::raw::c_char;

use crate::engine::EngineDetection;
use crate::session::Session;

/// Size of `MeshMindDetection::feature_id`, NUL terminator included.
pub const FEATURE_ID_CAPACITY: usize = 256;

/// One detection as seen by C callers.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct MeshMindDetection {
    pub feature_id: [c_char; FEATURE_ID_CAPACITY],
    /// 4x4 row-major.
    pub transform: [f64; 16],
    pub confidence: f64,
    pub position: [f64; 3],
    /// 0 when the engine reported none.
    pub radius: f64,
}

impl MeshMindDetection {
    pub fn zeroed() -> Self {
        Self {
            feature_id: [0; FEATURE_ID_CAPACITY],
            transform: [0.0; 16],
            confidence: 0.0,
            position: [0.0; 3],
            radius: 0.0,
        }
    }

    /// Identifier up to its NUL terminator.
    pub fn feature_id(&self) -> String {
        let bytes: Vec<u8> = self
            .feature_id
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl From<&EngineDetection> for MeshMindDetection {
    fn from(detection: &EngineDetection) -> Self {
        let mut record = Self::zeroed();
        let id = truncate_on_char_boundary(&detection.feature_id, FEATURE_ID_CAPACITY - 1);
        for (slot, byte) in record.feature_id.iter_mut().zip(id.bytes()) {
            *slot = byte as c_char;
        }
        for (row, values) in detection.transform.iter().enumerate() {
            record.transform[row * 4..row * 4 + 4].copy_from_slice(values);
        }
        record.confidence = detection.confidence;
        record.position = detection.position();
        record.radius = detection.radius.unwrap_or(0.0);
        record
    }
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// State behind an opaque `MeshMindDetector` pointer.
pub struct DetectorHandle {
    pub(crate) session: Session,
    /// Backing storage for the pointer handed out by `meshmind_get_error`.
    error: CString,
}

impl DetectorHandle {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session,
            error: CString::default(),
        }
    }

    /// Refresh the C copy of the last error and return a pointer to it.
    ///
    /// The pointer stays valid until the next call on this handle.
    pub(crate) fn error_ptr(&mut self) -> *const c_char {
        let message: Vec<u8> = self
            .session
            .last_error()
            .bytes()
            .filter(|&b| b != 0)
            .collect();
        // Interior NULs were filtered out above.
        self.error = CString::new(message).unwrap_or_default();
        self.error.as_ptr()
    }
}
