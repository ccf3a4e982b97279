pub mod counter;
pub mod error;
pub mod map;
pub mod object;
pub mod objectid;
pub mod op;
pub mod pool;
pub mod timeserial;
pub mod value;

pub use error::{ObjectError, Result};
pub use object::{ApplyOutcome, LiveObject, ObjectData, ObjectUpdate};
pub use objectid::{ObjectId, ObjectType};
pub use op::{ObjectOperation, ObjectState};
pub use pool::{CompactValue, ObjectPool, ParentRef};
pub use timeserial::Timeserial;
pub use value::{Primitive, Value};
