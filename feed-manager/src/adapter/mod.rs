//! Protocol-adapter boundary
//!
//! The vendor session is consumed through a narrow seam: the `MarketSession`
//! trait covers exactly the primitives the core needs (connect/disconnect,
//! channel-id allocation, subscribe/cancel per channel kind) and inbound
//! events arrive on a single queue drained by one reader task. Everything
//! else the vendor's callback surface offers stays outside the core.

pub mod codes;
pub mod mock;
mod traits;

pub use mock::{MockSession, SessionCall};
pub use traits::*;
