//! Session key material extracted from a completed exchange.

use std::fmt;

use zeroize::Zeroizing;

/// The shared session key negotiated during an authentication exchange.
///
/// The backing buffer is erased on drop. The Debug implementation never
/// reveals the key bytes.
///
/// ```rust
/// use garm_engine_traits::SessionKey;
///
/// let key = SessionKey::from_slice(b"0123456789abcdef");
/// assert_eq!(key.len(), 16);
/// assert_eq!(format!("{key:?}"), "<SECRET>");
/// ```
#[derive(Clone)]
pub struct SessionKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl SessionKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The Debug implementation of [SessionKey] does not reveal the key,
/// instead a placeholder `<SECRET>` is used
impl fmt::Debug for SessionKey {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("<SECRET>")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn debug_never_prints_key_bytes() {
        let key = SessionKey::from_slice(b"super secret key");
        let rendered = format!("{:?}", key);
        assert_eq!(rendered, "<SECRET>");
        assert!(!rendered.contains("super"));
    }

    #[test]
    fn exposes_bytes_and_length() {
        let key = SessionKey::new(vec![1, 2, 3]);
        assert_eq!(key.as_bytes(), &[1, 2, 3]);
        assert_eq!(key.len(), 3);
        assert!(!key.is_empty());
        assert!(SessionKey::new(Vec::new()).is_empty());
    }
}
