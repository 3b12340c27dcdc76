//! Deferred-destruction queue (§4.2).
//!
//! A fixed-size array (one FIFO list per frame slot) of move-only destructor
//! closures, plus one global list that only runs at shutdown. This is the
//! "Deferred destruction as closures" design note (§9): rather than the
//! original's `std::function<void()>`, each destructor is a boxed `FnOnce`
//! captured at the call site, so the allocator/device borrow it closes over
//! is known statically.

/// A single deferred destructor. Boxed because the queue must hold a
/// heterogeneous collection of closures, each capturing whatever resource
/// handle (and borrow of the allocator) it needs to destroy itself.
type Destructor = Box<dyn FnOnce() + Send>;

/// Defers destruction of GPU objects until the frame that scheduled them has
/// finished executing on the GPU (its fence has signaled).
///
/// Reverse-insertion order matters within a single frame's flush: derived
/// resources (image views) are pushed after the resource they view, so they
/// must be destroyed first. See Scenario F in spec.md §8.
pub struct DeletionQueue {
    per_frame: Vec<Vec<Destructor>>,
    global: Vec<Destructor>,
}

impl DeletionQueue {
    /// Creates a queue with one FIFO list per frame slot.
    pub fn new(frames_in_flight: u32) -> Self {
        DeletionQueue {
            per_frame: (0..frames_in_flight).map(|_| Vec::new()).collect(),
            global: Vec::new(),
        }
    }

    /// Schedules `destructor` to run the next time frame `frame_index`'s
    /// slot is flushed (i.e. after that frame's fence has signaled).
    pub fn push(&mut self, frame_index: u32, destructor: impl FnOnce() + Send + 'static) {
        self.per_frame[frame_index as usize].push(Box::new(destructor));
    }

    /// Schedules `destructor` to run only at [`DeletionQueue::flush_all`] (shutdown).
    pub fn push_global(&mut self, destructor: impl FnOnce() + Send + 'static) {
        self.global.push(Box::new(destructor));
    }

    /// Runs every destructor queued for `frame_index`, in reverse insertion
    /// order, then clears that slot's list.
    pub fn flush_frame(&mut self, frame_index: u32) {
        let list = &mut self.per_frame[frame_index as usize];
        while let Some(destructor) = list.pop() {
            destructor();
        }
    }

    /// Flushes every frame slot, then the global list. Intended for
    /// shutdown, after `vkDeviceWaitIdle`.
    pub fn flush_all(&mut self) {
        for i in 0..self.per_frame.len() {
            self.flush_frame(i as u32);
        }
        while let Some(destructor) = self.global.pop() {
            destructor();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn flush_runs_in_reverse_insertion_order() {
        // Not Send in the test, so we bypass the `Send` bound with a thread-local style
        // check using `std::sync::Mutex` around a plain Vec instead of Rc<RefCell<_>>.
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut queue = DeletionQueue::new(1);

        let o1 = order.clone();
        queue.push(0, move || o1.lock().unwrap().push("image"));
        let o2 = order.clone();
        queue.push(0, move || o2.lock().unwrap().push("view"));

        queue.flush_frame(0);

        assert_eq!(*order.lock().unwrap(), vec!["view", "image"]);
    }

    #[test]
    fn flush_frame_clears_the_slot() {
        let count = Rc::new(RefCell::new(0));
        let mut queue = DeletionQueue::new(2);
        // Use a thread-unsafe counter only to assert emptiness; pushes below are Send-safe.
        let _ = count;

        let ran = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let r = ran.clone();
        queue.push(1, move || {
            r.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        queue.flush_frame(1);
        queue.flush_frame(1);

        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn global_destructors_only_run_on_flush_all() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut queue = DeletionQueue::new(2);

        let r = ran.clone();
        queue.push_global(move || r.store(true, std::sync::atomic::Ordering::SeqCst));

        queue.flush_frame(0);
        queue.flush_frame(1);
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));

        queue.flush_all();
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
