//! Merged iteration over a transaction overlay and its backing tree.

use std::cmp::Ordering;

/// Iterates key/value pairs in lexicographic byte order, overlaying the
/// write transaction's buffered operations on the backing tree. Buffered
/// deletes suppress backing entries; buffered puts shadow them.
pub(crate) struct RawIter {
    overlay: std::iter::Peekable<std::vec::IntoIter<(Vec<u8>, Option<Vec<u8>>)>>,
    backing: std::iter::Peekable<Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>>>,
    reverse: bool,
}

impl RawIter {
    pub(crate) fn new(
        overlay: Vec<(Vec<u8>, Option<Vec<u8>>)>,
        backing: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>>,
        reverse: bool,
    ) -> Self {
        Self {
            overlay: overlay.into_iter().peekable(),
            backing: backing.peekable(),
            reverse,
        }
    }

    fn peek_backing(&mut self) -> Option<&(sled::IVec, sled::IVec)> {
        match self.backing.peek() {
            Some(Ok(entry)) => Some(entry),
            Some(Err(error)) => panic!("database iteration failed: {error}"),
            None => None,
        }
    }
}

impl Iterator for RawIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let overlay_key = self.overlay.peek().map(|(key, _)| key.clone());
            let backing_key = self.peek_backing().map(|(key, _)| key.to_vec());
            let take_overlay = match (&overlay_key, &backing_key) {
                (None, None) => return None,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(o), Some(b)) => {
                    let ord = if self.reverse { b.cmp(o) } else { o.cmp(b) };
                    match ord {
                        Ordering::Equal => {
                            // Overlay shadows the committed entry.
                            let _ = self.backing.next();
                            true
                        }
                        Ordering::Less => true,
                        Ordering::Greater => false,
                    }
                }
            };
            if take_overlay {
                let (key, value) = self.overlay.next().expect("peeked overlay entry");
                match value {
                    Some(value) => return Some((key, value)),
                    None => continue, // buffered delete
                }
            }
            let (key, value) = self
                .backing
                .next()
                .expect("peeked backing entry")
                .expect("checked for backend error");
            return Some((key.to_vec(), value.to_vec()));
        }
    }
}
