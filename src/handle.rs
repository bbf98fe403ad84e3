use crate::body::MessageBody;

use std::cell::{RefCell, RefMut};
use std::fmt;
use std::sync::Arc;

/// Reference-counted handle to message content. Cloning shares the
/// content *and* the cursor: the count is atomic, the content is not
/// synchronized, so concurrent use of clones from multiple threads is
/// not supported.
#[derive(Clone)]
pub(crate) struct MessageHandle(Arc<RefCell<MessageBody>>);

impl MessageHandle {
    pub(crate) fn new(body: MessageBody) -> Self {
        MessageHandle(Arc::new(RefCell::new(body)))
    }

    pub(crate) fn body(&self) -> RefMut<'_, MessageBody> {
        self.0.borrow_mut()
    }

    pub(crate) fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandle")
            .field("refs", &Arc::strong_count(&self.0))
            .finish()
    }
}
