//! Hierarchy & Slice Resolver (spec §4.6): session/channel/segment
//! structures, time/index slice resolution, and contiguous-region
//! discovery. A session is a directory of channel directories, each holding
//! segment directories: the same nested-by-name lookup shape as a
//! directory tree walked over an inode table, just over the filesystem
//! directly rather than through one.

pub mod channel;
pub mod contigua;
pub mod segment;
pub mod session;
pub mod slice;

pub use channel::Channel;
pub use contigua::Contiguon;
pub use segment::Segment;
pub use session::Session;
pub use slice::{FindIndexMode, SearchMode, Slice};
