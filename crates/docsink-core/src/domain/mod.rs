//! Domain model (messages, keys, outcomes, delivery state, errors).

pub mod message;
pub mod key;
pub mod outcome;
pub mod state;
pub mod errors;

pub use self::errors::{ErrorKind, HandleError, KeyError};
pub use self::key::{DocKey, KeyFieldList, KeyOrigin, ResolvedKey};
pub use self::message::{Message, MessageId};
pub use self::outcome::{Disposition, HandleOutcome};
pub use self::state::DeliveryState;
