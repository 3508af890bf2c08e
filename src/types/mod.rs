mod change;
mod document;
mod filter;
mod projection;
mod sort;
mod update;

pub use change::{ChangeEvent, DocumentKey, OperationType, StreamEvent, UpdateDescription};
pub use document::{get_path, new_document_id, remove_path, set_path, Document, ID_FIELD};
pub use filter::{CmpOp, Filter};
pub use projection::Projection;
pub use sort::{SortDirection, SortSpec};
pub use update::{UpdateOp, UpdateSpec};
