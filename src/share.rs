use crate::Core;
use qcell::QCell;
use std::rc::Rc;

/// Ref-counted shared mutable data, owned by one loop
///
/// Registered functions on the same loop often need to see the same
/// state, for example a result slot filled by one callback and read
/// by a timer.  [`Share`] gives them that without `Rc<RefCell>`:
/// access goes through the loop's [`Core`], so the borrow checker
/// guarantees exclusive access at compile time and there is no
/// runtime borrow flag to trip over.
///
/// The cell's owner is the [`Core`] that created it.  Accessing the
/// contents through a different loop's [`Core`] panics.
///
/// To borrow two [`Share`] instances at once, see
/// [`Core::share_rw2`].
///
/// [`Core::share_rw2`]: struct.Core.html#method.share_rw2
/// [`Core`]: struct.Core.html
/// [`Share`]: struct.Share.html
pub struct Share<T> {
    pub(crate) rc: Rc<QCell<T>>,
}

impl<T> Share<T> {
    /// Create a new Share instance
    pub fn new(core: &Core, val: T) -> Self {
        Self {
            rc: Rc::new(core.sharecell_owner.cell(val)),
        }
    }

    /// Get a read-only reference to the contents
    #[inline]
    pub fn ro<'a>(&'a self, core: &'a Core) -> &'a T {
        core.sharecell_owner.ro(&self.rc)
    }

    /// Get a read-write reference to the contents
    #[inline]
    pub fn rw<'a>(&'a self, core: &'a mut Core) -> &'a mut T {
        core.sharecell_owner.rw(&self.rc)
    }
}

impl<T> Clone for Share<T> {
    /// Return another reference to the shared data
    fn clone(&self) -> Self {
        Self {
            rc: self.rc.clone(),
        }
    }
}
