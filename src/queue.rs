/// A deferred operation on a loop context
pub(crate) type BoxedOp<S> = Box<dyn FnOnce(&mut S) + 'static>;

/// FIFO of deferred operations, all run against the same context.
///
/// Operations queued while the queue is being run go onto whatever
/// queue the context holds at that moment, never onto the one being
/// run, so callers swap a spare queue in before running.
pub(crate) struct OpQueue<S: 'static> {
    ops: Vec<BoxedOp<S>>,
}

impl<S> OpQueue<S> {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, op: impl FnOnce(&mut S) + 'static) {
        self.ops.push(Box::new(op));
    }

    #[inline]
    pub fn push_box(&mut self, op: BoxedOp<S>) {
        self.ops.push(op);
    }

    /// Run everything in order, leaving the queue empty but keeping
    /// its allocation for reuse
    pub fn run(&mut self, cx: &mut S) {
        for op in self.ops.drain(..) {
            op(cx);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl<S> Default for OpQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}
