use parking_lot::Mutex;
use rand::Rng;

const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const LENGTH: usize = 26;
const TIME_HEX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Session,
    Message,
}

impl Prefix {
    fn as_str(&self) -> &'static str {
        match self {
            Prefix::Session => "ses",
            Prefix::Message => "msg",
        }
    }
}

/// Last timestamp handed out and the per-millisecond counter, updated together.
static CLOCK: Mutex<(u64, u32)> = Mutex::new((0, 0));

fn random_base62(length: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut result = String::with_capacity(length);
    for _ in 0..length {
        let idx = rng.gen_range(0..62);
        result.push(BASE62_CHARS[idx] as char);
    }
    result
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

fn next_counter(timestamp: u64) -> u32 {
    let mut clock = CLOCK.lock();
    if clock.0 != timestamp {
        *clock = (timestamp, 0);
    }
    clock.1 += 1;
    clock.1
}

/// Creates a prefixed id that sorts by creation time.
///
/// Ids created within the same millisecond are kept distinct (and ordered) by a
/// counter folded into the low bits of the time component.
pub fn create(prefix: Prefix, timestamp: Option<u64>) -> String {
    let current_timestamp = timestamp.unwrap_or_else(now_millis);
    let counter = next_counter(current_timestamp);
    let packed = current_timestamp * 0x1000 + u64::from(counter);

    format!(
        "{}_{}{}",
        prefix.as_str(),
        hex::encode(packed.to_be_bytes()),
        random_base62(LENGTH - TIME_HEX_LEN)
    )
}

/// Shorthand for a fresh message id.
pub fn message_id() -> String {
    create(Prefix::Message, None)
}

/// Shorthand for a fresh session id.
pub fn session_id() -> String {
    create(Prefix::Session, None)
}

/// Creation time in milliseconds encoded in an id made by [`create`].
pub fn timestamp(id: &str) -> Option<u64> {
    let (_, rest) = id.split_once('_')?;
    let hex = rest.get(0..TIME_HEX_LEN)?;
    let encoded = u64::from_str_radix(hex, 16).ok()?;
    Some(encoded / 0x1000)
}

pub fn validate_prefix(id: &str, expected: Prefix) -> bool {
    id.split_once('_')
        .is_some_and(|(prefix, _)| prefix == expected.as_str())
}
