//! A queue for outbound robot commands. See [`CommandQueue`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A single outbound command, written to the device as `<code><value>\n`.
///
/// Commands are opaque to the bridge; the only validation is that they are not empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command(String);

impl Command {
    /// Returns a `Command` wrapping `text`, or `None` if `text` is empty.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();

        if text.is_empty() {
            None
        } else {
            Some(Command(text))
        }
    }

    /// Builds a command from a single-character code and a value.
    fn coded(code: char, value: impl fmt::Display) -> Self {
        Command(format!("{}{}", code, value))
    }

    /// Motor X axis, scaled by 100.
    pub fn motor_x(value: i32) -> Self {
        Command::coded('X', value)
    }

    /// Motor Y axis, scaled by 100.
    pub fn motor_y(value: i32) -> Self {
        Command::coded('Y', value)
    }

    pub fn motor_offset(value: &str) -> Self {
        Command::coded('O', value)
    }

    pub fn steering_offset(value: &str) -> Self {
        Command::coded('S', value)
    }

    pub fn animation_mode(value: &str) -> Self {
        Command::coded('M', value)
    }

    /// Starts the animation with the given ID.
    pub fn animation(id: &str) -> Self {
        Command::coded('A', id)
    }

    /// Moves a servo directly. The servo ID is passed through verbatim.
    pub fn servo(id: &str, value: &str) -> Option<Self> {
        Command::new(format!("{}{}", id, value))
    }

    /// Returns the command text without a line terminator.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered queue of pending commands, shared between any number of producers and the single
/// link worker that drains it. Cloning returns another handle to the same queue.
///
/// Every operation takes the same lock, and the lock is never held across I/O.
#[derive(Clone, Default)]
pub struct CommandQueue {
    queue: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    /// Returns a new empty `CommandQueue`.
    pub fn new() -> Self {
        CommandQueue::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Command>> {
        // A producer panicking mid-push cannot leave the deque in a broken state
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends a command to the tail of the queue. Never blocks beyond the queue lock.
    pub fn enqueue(&self, command: Command) {
        self.lock().push_back(command);
    }

    /// Appends several commands under a single lock acquisition, so that no other producer's
    /// commands are interleaved between them.
    pub fn enqueue_all<I: IntoIterator<Item = Command>>(&self, commands: I) {
        self.lock().extend(commands);
    }

    /// Removes and returns the command at the head of the queue, or `None` if it is empty.
    ///
    /// Only the link worker calls this.
    pub fn drain_if_nonempty(&self) -> Option<Command> {
        self.lock().pop_front()
    }

    /// Discards every pending command and returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let discarded = queue.len();
        queue.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn command(text: &str) -> Command {
        Command::new(text).unwrap()
    }

    #[test]
    fn test_command_new() {
        assert_eq!(None, Command::new(""));
        assert_eq!("X-50", command("X-50").as_str());
    }

    #[test]
    fn test_command_codes() {
        assert_eq!("X-100", Command::motor_x(-100).as_str());
        assert_eq!("Y42", Command::motor_y(42).as_str());
        assert_eq!("O3", Command::motor_offset("3").as_str());
        assert_eq!("S-2", Command::steering_offset("-2").as_str());
        assert_eq!("M1", Command::animation_mode("1").as_str());
        assert_eq!("A7", Command::animation("7").as_str());
        assert_eq!("G85", Command::servo("G", "85").unwrap().to_string());
        assert_eq!(None, Command::servo("", ""));
    }

    #[test]
    fn test_queue_fifo() {
        let queue = CommandQueue::new();
        assert!(queue.is_empty());

        queue.enqueue(command("X1"));
        queue.enqueue(command("Y2"));
        queue.enqueue_all([command("A3"), command("M0")]);

        assert_eq!(4, queue.len());
        assert_eq!(Some(command("X1")), queue.drain_if_nonempty());
        assert_eq!(Some(command("Y2")), queue.drain_if_nonempty());
        assert_eq!(Some(command("A3")), queue.drain_if_nonempty());
        assert_eq!(Some(command("M0")), queue.drain_if_nonempty());
        assert_eq!(None, queue.drain_if_nonempty());
    }

    #[test]
    fn test_queue_clear() {
        let queue = CommandQueue::new();

        queue.enqueue(command("X1"));
        queue.enqueue(command("Y1"));

        assert_eq!(2, queue.clear());
        assert!(queue.is_empty());
        assert_eq!(None, queue.drain_if_nonempty());
        assert_eq!(0, queue.clear());
    }

    #[test]
    fn test_queue_clone_shares_state() {
        let queue = CommandQueue::new();
        let handle = queue.clone();

        handle.enqueue(command("A1"));

        assert_eq!(Some(command("A1")), queue.drain_if_nonempty());
        assert!(handle.is_empty());
    }

    #[test]
    fn test_queue_concurrent_producers() {
        let queue = CommandQueue::new();
        let producers = 8;
        let per_producer = 200;

        let handles = (0..producers)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..per_producer {
                        queue.enqueue(command(&format!("{}_{}", p, i)));
                    }
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        // Each producer's commands come out in the order that producer enqueued them
        let mut next = vec![0; producers];
        while let Some(c) = queue.drain_if_nonempty() {
            let (p, i) = c.as_str().split_once('_').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());

            assert_eq!(next[p], i);
            next[p] += 1;
        }

        assert!(next.iter().all(|n| *n == per_producer));
    }
}
