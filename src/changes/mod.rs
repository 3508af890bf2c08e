mod router;
mod stream;

pub(crate) use router::ChangeRouter;
pub use stream::ChangeStream;
