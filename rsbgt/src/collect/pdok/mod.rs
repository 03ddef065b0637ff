pub mod pdok_collect;

pub use pdok_collect::{poll_until_ready, DownloadFormat, DownloadRequest, PdokCollect, PollState};
