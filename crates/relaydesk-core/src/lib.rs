pub mod clock;
pub mod error;
pub mod notice;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use error::{ErrorKind, RelayError, Result};
pub use notice::{Notice, NoticeBus, NoticeKind, NotifyLevel};
