use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Cooperative cancellation handle shared between a lane and the I/O layer.
///
/// Clones share state. Cancelling runs the registered abort hook once; a hook
/// registered after cancellation runs immediately.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Rc<TokenState>,
}

#[derive(Default)]
struct TokenState {
    cancelled: Cell<bool>,
    on_cancel: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if self.inner.cancelled.replace(true) {
            return;
        }
        let hook = self.inner.on_cancel.borrow_mut().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Register the abort action for the I/O currently using this token.
    pub fn on_cancel(&self, hook: impl FnOnce() + 'static) {
        if self.is_cancelled() {
            hook();
            return;
        }
        *self.inner.on_cancel.borrow_mut() = Some(Box::new(hook));
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
