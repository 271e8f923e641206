//! Hot, replaying multicast subjects for the `futures` ecosystem.
//!
//! A [`BehaviorSubject`] remembers the most recently published value and hands
//! it to every new listener before forwarding live events. Listeners are plain
//! [`futures::Stream`]s yielding `Result<T, ErrorEvent<E>>`; the stream ends
//! when the subject is closed.
//!
//! ```
//! use futures::{executor::block_on, StreamExt};
//! use futures_subject::BehaviorSubject;
//!
//! let subject = BehaviorSubject::<i32, String>::seeded(1);
//! let late = subject.subscribe();
//!
//! subject.emit_value(2).unwrap();
//! subject.close().unwrap();
//!
//! let seen: Vec<i32> = block_on(late.map(|event| event.unwrap()).collect());
//! assert_eq!(seen, vec![1, 2]);
//! ```

mod publisher;
pub use publisher::*;
