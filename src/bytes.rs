use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read};

/// Bytes reads from a reader and allows bytes that turn out not to be needed to be
/// handed back, i.e., peek-and-unread. Unread bytes are returned again in their
/// original order before any new bytes are read.
pub struct Bytes<R>
where
    R: Read + Send,
{
    reader: R,
    num_read: usize,
    cache: VecDeque<u8>,
}

impl<R> Bytes<R>
where
    R: Read + Send,
{
    pub fn new(reader: R) -> Self {
        Bytes {
            reader,
            num_read: 0,
            cache: VecDeque::new(),
        }
    }

    /// Fill as much of `buf` as possible, returning the number of bytes filled. A
    /// short count means the reader is exhausted.
    ///
    /// # Errors
    /// Any IO error other than interruption.
    pub fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.cache.pop_front() {
                Some(b) => {
                    buf[filled] = b;
                    filled += 1;
                }
                None => break,
            }
        }

        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    self.num_read += n;
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(filled)
    }

    /// Put `dat` back so it is produced by the next reads, in order.
    pub fn unread(&mut self, dat: &[u8]) {
        for b in dat.iter().rev() {
            self.cache.push_front(*b);
        }
    }

    /// Number of bytes consumed so far, not counting unread bytes.
    pub fn offset(&self) -> usize {
        self.num_read - self.cache.len()
    }
}
