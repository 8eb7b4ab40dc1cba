//! Audio artifacts: formats, the external materialization tool and the
//! single-flight download coordinator

mod coordinator;
mod format;
mod tool;

pub use coordinator::{Completion, DEFAULT_MAX_CONCURRENT, DownloadCoordinator, WORK_DIR_NAME};
pub use format::{AudioFormat, artifact_path, sanitize_content_id};
pub use tool::{Materializer, YtDlp};
