use std::{
    collections::{HashMap, VecDeque},
    task::{Poll, Waker},
};

pub(crate) type ListenerId = u64;

/// Per-listener delivery queue.
struct Slot<Item> {
    queue: VecDeque<Item>,
    waker: Option<Waker>,
    done: bool,
}

impl<Item> Slot<Item> {
    fn wake(&mut self) {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
    }
}

/// Broadcast primitive: N independent listeners, each with its own queue.
///
/// Items reach every listener attached at broadcast time, in broadcast order.
/// Nothing here knows about cached values; the owner decides what to replay
/// through [`Fanout::attach`].
pub(crate) struct Fanout<Item> {
    listeners: HashMap<ListenerId, Slot<Item>>,
    next_id: ListenerId,
    closed: bool,
}

impl<Item> Fanout<Item> {
    pub(crate) fn new() -> Self {
        Fanout {
            listeners: HashMap::new(),
            next_id: 0,
            closed: false,
        }
    }

    /// Attach a listener whose queue starts with `replay`.
    ///
    /// Returns the new id and whether it is the first attached listener.
    /// A listener attached after close is born finished and sees no replay.
    pub(crate) fn attach(&mut self, replay: Option<Item>) -> (ListenerId, bool) {
        let id = self.next_id;
        self.next_id += 1;

        let first = self.listeners.is_empty();

        let mut queue = VecDeque::new();

        if !self.closed {
            queue.extend(replay);
        }

        self.listeners.insert(
            id,
            Slot {
                queue,
                waker: None,
                done: self.closed,
            },
        );

        (id, first)
    }

    /// Detach a listener, dropping anything still queued for it.
    ///
    /// Returns true when this removed the last listener.
    pub(crate) fn detach(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some() && self.listeners.is_empty()
    }

    /// Mark every listener finished. Queued items are still delivered.
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }

        self.closed = true;

        for slot in self.listeners.values_mut() {
            slot.done = true;
            slot.wake();
        }
    }

    pub(crate) fn poll_listener(&mut self, id: ListenerId, waker: &Waker) -> Poll<Option<Item>> {
        let slot = match self.listeners.get_mut(&id) {
            Some(slot) => slot,
            None => return Poll::Ready(None),
        };

        if let Some(item) = slot.queue.pop_front() {
            return Poll::Ready(Some(item));
        }

        if slot.done {
            return Poll::Ready(None);
        }

        slot.waker = Some(waker.clone());

        Poll::Pending
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl<Item> Fanout<Item>
where
    Item: Clone,
{
    pub(crate) fn broadcast(&mut self, item: Item) {
        if self.closed {
            return;
        }

        // the last listener takes the item by move
        let mut iter = self.listeners.values_mut().peekable();

        while let Some(slot) = iter.next() {
            if iter.peek().is_some() {
                slot.queue.push_back(item.clone());
                slot.wake();
            } else {
                slot.queue.push_back(item);
                slot.wake();
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker;

    fn drain(fanout: &mut Fanout<i32>, id: ListenerId) -> (Vec<i32>, bool) {
        let waker = noop_waker();
        let mut items = vec![];

        loop {
            match fanout.poll_listener(id, &waker) {
                Poll::Ready(Some(item)) => items.push(item),
                Poll::Ready(None) => return (items, true),
                Poll::Pending => return (items, false),
            }
        }
    }

    #[test]
    fn test_replay_is_private_to_new_listener() {
        let mut fanout = Fanout::new();

        let (a, first) = fanout.attach(None);
        assert!(first);

        fanout.broadcast(1);

        let (b, first) = fanout.attach(Some(1));
        assert!(!first);

        fanout.broadcast(2);

        assert_eq!(drain(&mut fanout, a), (vec![1, 2], false));
        assert_eq!(drain(&mut fanout, b), (vec![1, 2], false));
    }

    #[test]
    fn test_detach_reports_last_listener() {
        let mut fanout = Fanout::<i32>::new();

        let (a, _) = fanout.attach(None);
        let (b, _) = fanout.attach(None);

        assert!(!fanout.detach(a));
        assert!(!fanout.detach(a));
        assert_eq!(fanout.listener_count(), 1);
        assert!(fanout.detach(b));
        assert_eq!(fanout.listener_count(), 0);
    }

    #[test]
    fn test_close_flushes_then_finishes() {
        let mut fanout = Fanout::new();

        let (a, _) = fanout.attach(Some(7));
        fanout.broadcast(8);
        fanout.close();
        fanout.broadcast(9);

        assert!(fanout.is_closed());
        assert_eq!(drain(&mut fanout, a), (vec![7, 8], true));

        let (late, _) = fanout.attach(Some(10));
        assert_eq!(drain(&mut fanout, late), (vec![], true));
    }
}
