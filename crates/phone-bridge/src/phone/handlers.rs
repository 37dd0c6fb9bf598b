//! Ordered incoming-call handlers

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::call::Call;

/// Gets offered every incoming call
///
/// Handlers are asked in ascending order; the first one returning true owns
/// the call and no further handler sees it. Handlers run on the GUI thread
/// while the phone is borrowed, so they act on the call they are given and
/// nothing else.
pub trait CallHandler {
    fn receive_call(&self, order: i32, call: &mut Call) -> bool;
}

impl<F> CallHandler for F
where
    F: Fn(i32, &mut Call) -> bool,
{
    fn receive_call(&self, order: i32, call: &mut Call) -> bool {
        self(order, call)
    }
}

#[derive(Default)]
pub(crate) struct HandlerList {
    handlers: BTreeMap<i32, Vec<Rc<dyn CallHandler>>>,
}

impl HandlerList {
    /// Register a handler; registering the same handler twice at one order is a no-op
    pub(crate) fn insert(&mut self, order: i32, handler: Rc<dyn CallHandler>) -> bool {
        let at_order = self.handlers.entry(order).or_default();
        if at_order.iter().any(|h| Rc::ptr_eq(h, &handler)) {
            return false;
        }
        at_order.push(handler);
        true
    }

    pub(crate) fn remove(&mut self, order: i32, handler: &Rc<dyn CallHandler>) -> bool {
        let Some(at_order) = self.handlers.get_mut(&order) else {
            return false;
        };
        let before = at_order.len();
        at_order.retain(|h| !Rc::ptr_eq(h, handler));
        let removed = at_order.len() != before;
        if at_order.is_empty() {
            self.handlers.remove(&order);
        }
        removed
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    /// Snapshot in offer order
    pub(crate) fn ordered(&self) -> Vec<(i32, Rc<dyn CallHandler>)> {
        self.handlers
            .iter()
            .flat_map(|(order, handlers)| handlers.iter().map(move |h| (*order, h.clone())))
            .collect()
    }
}

/// Offer a call to each handler in order until one accepts it
pub(crate) fn offer(handlers: &[(i32, Rc<dyn CallHandler>)], call: &mut Call) -> bool {
    handlers
        .iter()
        .any(|(order, handler)| handler.receive_call(*order, call))
}
