#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
extern crate self as binder_dispatch;

pub mod driver;
pub mod error;
pub mod message;
pub mod parcel;
pub mod parcelable;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod router;
pub mod thread;
pub mod translate;

pub use driver::{Driver, DriverConfig, WriteRead};
pub use error::{BinderError, Result};
pub use message::{Message, ObjectId, PendingReply, QueueId, TransactionPayload};
pub use parcel::Parcel;
pub use parcelable::{Parcelable, String16};
pub use pool::ThreadPoolController;
pub use process::ProcessRecord;
pub use protocol::{BinderCommand, BinderReturn, FlatObject, ObjectTag, TransactionFlags};
pub use queue::{MessageQueue, Pop};
pub use registry::{BinderObject, ObjectRegistry};
pub use router::TransactionRouter;
pub use thread::{LooperState, Worker};
