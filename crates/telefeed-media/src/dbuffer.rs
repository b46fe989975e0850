// crates/telefeed-media/src/dbuffer.rs
//
// Two-slot frame hand-off between one producer stage and one consumer
// stage.
//
// Ownership is arranged so that neither side ever touches the other's
// working frame: the consumer permanently owns its front frame, and the
// producer takes the back frame *out* of the shared slot to fill it outside
// the lock. `flip` swaps the consumer's front with the published back, so
// the two preallocated frames circulate forever without reallocation.
//
// The `repeat` hint covers the cadence-padding case: the producer asks the
// consumer to present its current front once more without the shared slot
// being written at all.

use std::sync::{Condvar, Mutex};

use crate::queue::Aborted;

/// Outcome of a consumer `flip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    /// The front frame now holds newly produced content.
    Fresh,
    /// Present the unchanged front frame again.
    Repeat,
    /// The producer is gone; no more frames will arrive.
    Aborted,
}

struct Slot<T> {
    back:   Option<T>,
    ready:  bool,
    repeat: bool,
    abort:  bool,
}

pub struct FrameDoubleBuffer<T> {
    slot: Mutex<Slot<T>>,
    cond: Condvar,
}

impl<T> FrameDoubleBuffer<T> {
    /// Create a buffer whose shared slot starts out holding `back`.
    /// The consumer's front frame lives with the consumer, not here.
    pub fn new(back: T) -> Self {
        Self {
            slot: Mutex::new(Slot { back: Some(back), ready: false, repeat: false, abort: false }),
            cond: Condvar::new(),
        }
    }

    /// Take the back frame out for filling. Blocks while the previous
    /// publication has not been consumed. Returns `None` once aborted.
    pub fn back_buffer(&self) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        while slot.ready && !slot.abort {
            slot = self.cond.wait(slot).unwrap();
        }
        if slot.abort {
            return None;
        }
        slot.back.take()
    }

    /// Return a frame taken with [`back_buffer`] without publishing it
    /// (nothing was produced after all).
    pub fn restore(&self, frame: T) {
        let mut slot = self.slot.lock().unwrap();
        slot.back = Some(frame);
    }

    /// Publish a filled frame into the shared slot and mark it ready.
    /// Blocks while the previous publication has not been consumed; on
    /// abort the frame is dropped and `Err(Aborted)` returned.
    pub fn publish(&self, frame: T) -> Result<(), Aborted> {
        let mut slot = self.slot.lock().unwrap();
        while slot.ready && !slot.abort {
            slot = self.cond.wait(slot).unwrap();
        }
        if slot.abort {
            return Err(Aborted);
        }
        slot.back = Some(frame);
        slot.ready = true;
        slot.repeat = false;
        self.cond.notify_all();
        Ok(())
    }

    /// Ask the consumer to re-present its front frame. The shared slot is
    /// untouched. Blocks and aborts exactly like [`publish`].
    pub fn repeat(&self) -> Result<(), Aborted> {
        let mut slot = self.slot.lock().unwrap();
        while slot.ready && !slot.abort {
            slot = self.cond.wait(slot).unwrap();
        }
        if slot.abort {
            return Err(Aborted);
        }
        slot.ready = true;
        slot.repeat = true;
        self.cond.notify_all();
        Ok(())
    }

    /// Consumer side: wait for a publication. On [`Flip::Fresh`] the caller's
    /// `front` has been swapped with the published frame and may be read in
    /// place until the next call; on [`Flip::Repeat`] it is untouched.
    pub fn flip(&self, front: &mut T) -> Flip {
        let mut slot = self.slot.lock().unwrap();
        while !slot.ready && !slot.abort {
            slot = self.cond.wait(slot).unwrap();
        }
        if slot.abort {
            return Flip::Aborted;
        }

        let result = if slot.repeat {
            Flip::Repeat
        } else {
            if let Some(back) = slot.back.as_mut() {
                std::mem::swap(front, back);
            }
            Flip::Fresh
        };
        slot.ready = false;
        self.cond.notify_all();
        result
    }

    /// Raise the abort latch and wake both sides.
    pub fn abort(&self) {
        let mut slot = self.slot.lock().unwrap();
        slot.abort = true;
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn publish_then_flip_swaps_content() {
        let buf = FrameDoubleBuffer::new(0u32);
        let mut front = 99u32;

        let back = buf.back_buffer().unwrap();
        assert_eq!(back, 0);
        buf.publish(back + 7).unwrap();

        assert_eq!(buf.flip(&mut front), Flip::Fresh);
        assert_eq!(front, 7);
        // The old front is now the recycled back frame.
        assert_eq!(buf.back_buffer(), Some(99));
    }

    #[test]
    fn repeat_leaves_front_untouched() {
        let buf = FrameDoubleBuffer::new(vec![0u8]);
        let mut front = vec![42u8];
        buf.repeat().unwrap();
        assert_eq!(buf.flip(&mut front), Flip::Repeat);
        assert_eq!(front, vec![42]);
    }

    #[test]
    fn restore_puts_the_back_frame_back() {
        let buf = FrameDoubleBuffer::new(5u32);
        let back = buf.back_buffer().unwrap();
        buf.restore(back);
        assert_eq!(buf.back_buffer(), Some(5));
    }

    #[test]
    fn second_publish_waits_for_consumer() {
        let buf = Arc::new(FrameDoubleBuffer::new(0u32));
        buf.publish(1).unwrap();

        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.publish(2).is_ok())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished(), "publish should block while ready");

        let mut front = 0u32;
        assert_eq!(buf.flip(&mut front), Flip::Fresh);
        assert_eq!(front, 1);
        assert!(producer.join().unwrap());
        assert_eq!(buf.flip(&mut front), Flip::Fresh);
        assert_eq!(front, 2);
    }

    #[test]
    fn abort_wakes_a_blocked_consumer() {
        let buf: Arc<FrameDoubleBuffer<u32>> = Arc::new(FrameDoubleBuffer::new(0));
        let consumer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut front = 0u32;
                buf.flip(&mut front)
            })
        };
        thread::sleep(Duration::from_millis(50));
        buf.abort();
        assert_eq!(consumer.join().unwrap(), Flip::Aborted);
    }

    #[test]
    fn abort_wakes_a_blocked_producer() {
        let buf = Arc::new(FrameDoubleBuffer::new(0u32));
        buf.publish(1).unwrap();
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.publish(2))
        };
        thread::sleep(Duration::from_millis(50));
        buf.abort();
        assert_eq!(producer.join().unwrap(), Err(Aborted));
    }

    #[test]
    fn interleaved_stream_preserves_order() {
        let buf: Arc<FrameDoubleBuffer<u32>> = Arc::new(FrameDoubleBuffer::new(0));
        let producer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 1..=20u32 {
                    let _ = buf.back_buffer();
                    if buf.publish(i).is_err() {
                        return;
                    }
                }
            })
        };

        let mut front = 0u32;
        let mut seen = Vec::new();
        for _ in 0..20 {
            assert_eq!(buf.flip(&mut front), Flip::Fresh);
            seen.push(front);
        }
        producer.join().unwrap();
        assert_eq!(seen, (1..=20).collect::<Vec<u32>>());
    }
}
