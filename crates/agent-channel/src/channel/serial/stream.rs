use std::fs::File;
use std::io;
use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Non-blocking async view of an open serial port, handed to the multiplexing session.
///
/// The descriptor must already be in non-blocking mode.
#[derive(Debug)]
pub(crate) struct SerialStream {
    inner: AsyncFd<File>,
}

impl SerialStream {
    pub(crate) fn new(file: File) -> io::Result<Self> {
        // SAFETY: the `File` owns its descriptor and is only released when the `AsyncFd` is
        // dropped, so the registered fd stays open and unchanged for the registration's lifetime.
        let inner = unsafe { AsyncFd::register(file) }?;
        Ok(Self { inner })
    }
}

impl AsyncRead for SerialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn nonblocking_pair() -> (SerialStream, SerialStream) {
        let (left, right) = UnixStream::pair().unwrap();
        left.set_nonblocking(true).unwrap();
        right.set_nonblocking(true).unwrap();
        let left = SerialStream::new(File::from(OwnedFd::from(left))).unwrap();
        let right = SerialStream::new(File::from(OwnedFd::from(right))).unwrap();
        (left, right)
    }

    #[tokio::test]
    async fn bytes_cross_the_descriptor() {
        let (mut left, mut right) = nonblocking_pair();
        left.write_all(b"hello host").await.unwrap();
        let mut buf = [0u8; 10];
        right.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello host");
    }
}
