use std::fmt;

/// Handle returned by every registration (listeners, middleware, services).
///
/// Dropping a disposer does not unregister anything; call [`Disposer::dispose`]
/// explicitly.
#[must_use = "dropping a Disposer keeps the registration alive forever"]
pub struct Disposer {
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl Disposer {
    pub fn new(cleanup: impl FnOnce() + 'static) -> Self {
        Self { cleanup: Some(Box::new(cleanup)) }
    }

    /// A disposer that does nothing.
    pub fn noop() -> Self {
        Self { cleanup: None }
    }

    /// Combine several disposers into one, disposed in reverse order.
    pub fn all(disposers: Vec<Disposer>) -> Self {
        Self::new(move || {
            for disposer in disposers.into_iter().rev() {
                disposer.dispose();
            }
        })
    }

    pub fn dispose(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("armed", &self.cleanup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn all_disposes_in_reverse() {
        let log: Rc<RefCell<Vec<u8>>> = Rc::default();
        let make = |n: u8| {
            let log = log.clone();
            Disposer::new(move || log.borrow_mut().push(n))
        };
        Disposer::all(vec![make(1), make(2), Disposer::noop(), make(3)]).dispose();
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
    }

    #[test]
    fn dropping_does_not_dispose() {
        let log: Rc<RefCell<Vec<u8>>> = Rc::default();
        let sink = log.clone();
        drop(Disposer::new(move || sink.borrow_mut().push(1)));
        assert!(log.borrow().is_empty());
    }
}
