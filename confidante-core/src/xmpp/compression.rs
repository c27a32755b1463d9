use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

const BUFFER_SIZE: usize = 4096;

/// Wraps a byte stream with optional zlib inflate, toggled on once XEP-0138
/// compression negotiation completes. Passes bytes through untouched until
/// [`Decompressor::enable`] is called, so the same wrapper can sit between
/// the connection and the XML parser from the start of the stream.
pub struct Decompressor<R> {
    inner: R,
    decompress: Decompress,
    enabled: bool,
    in_buf: Box<[u8]>,
    in_pos: usize,
    in_len: usize,
    eof: bool,
}

impl<R> Decompressor<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            decompress: Decompress::new(true),
            enabled: false,
            in_buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            in_pos: 0,
            in_len: 0,
            eof: false,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R> AsyncRead for Decompressor<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();

        if !me.enabled {
            return Pin::new(&mut me.inner).poll_read(cx, buf);
        }

        loop {
            if me.in_pos < me.in_len {
                let mut out = vec![0u8; buf.remaining().max(1)];
                let before_in = me.decompress.total_in();
                let before_out = me.decompress.total_out();

                let status = me
                    .decompress
                    .decompress(&me.in_buf[me.in_pos..me.in_len], &mut out, FlushDecompress::None)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                let consumed = (me.decompress.total_in() - before_in) as usize;
                let produced = (me.decompress.total_out() - before_out) as usize;
                me.in_pos += consumed;

                if produced > 0 {
                    buf.put_slice(&out[..produced]);
                    return Poll::Ready(Ok(()));
                }
                if status == Status::StreamEnd {
                    return Poll::Ready(Ok(()));
                }
                if consumed == 0 {
                    // decompressor needs a fresh chunk of input to make progress
                    me.in_pos = me.in_len;
                }
                continue;
            }

            if me.eof {
                return Poll::Ready(Ok(()));
            }

            me.in_pos = 0;
            me.in_len = 0;
            let mut read_buf = ReadBuf::new(&mut me.in_buf);
            match Pin::new(&mut me.inner).poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    me.in_len = read_buf.filled().len();
                    if me.in_len == 0 {
                        me.eof = true;
                    }
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// The write-side counterpart to [`Decompressor`]: zlib-deflates once
/// enabled, passes bytes straight through until then.
pub struct Compressor<W> {
    inner: W,
    compress: Compress,
    enabled: bool,
    out_buf: Box<[u8]>,
    out_pos: usize,
    out_len: usize,
}

impl<W> Compressor<W> {
    pub fn new(inner: W, level: Compression) -> Self {
        Self {
            inner,
            compress: Compress::new(level, true),
            enabled: false,
            out_buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            out_pos: 0,
            out_len: 0,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Drains whatever is buffered in `out_buf` to `inner`. Returns
    /// `Ready(Ok(()))` once the buffer is empty.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>>
    where
        W: AsyncWrite + Unpin,
    {
        while self.out_pos < self.out_len {
            let n = match Pin::new(&mut self.inner).poll_write(cx, &self.out_buf[self.out_pos..self.out_len]) {
                Poll::Ready(Ok(n)) => n,
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            };
            self.out_pos += n;
        }
        Poll::Ready(Ok(()))
    }
}

impl<W> AsyncWrite for Compressor<W>
where
    W: AsyncWrite + Unpin,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let me = self.get_mut();

        if !me.enabled {
            return Pin::new(&mut me.inner).poll_write(cx, buf);
        }

        match me.poll_drain(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            Poll::Pending => return Poll::Pending,
        }

        me.out_pos = 0;
        me.out_len = 0;
        let before_in = me.compress.total_in();
        let before_out = me.compress.total_out();

        let status = me
            .compress
            .compress(buf, &mut me.out_buf, FlushCompress::None)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let _ = status;

        let consumed = (me.compress.total_in() - before_in) as usize;
        let produced = (me.compress.total_out() - before_out) as usize;
        me.out_len = produced;

        Poll::Ready(Ok(consumed))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let me = self.get_mut();

        if !me.enabled {
            return Pin::new(&mut me.inner).poll_flush(cx);
        }

        match me.poll_drain(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
            Poll::Pending => return Poll::Pending,
        }

        loop {
            me.out_pos = 0;
            me.out_len = 0;
            let before_out = me.compress.total_out();

            let status = me
                .compress
                .compress(&[], &mut me.out_buf, FlushCompress::Sync)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

            me.out_len = (me.compress.total_out() - before_out) as usize;

            match me.poll_drain(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }

            if me.out_len == 0 || status == Status::BufError {
                break;
            }
        }

        Pin::new(&mut me.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let me = self.get_mut();

        if me.enabled {
            match me.poll_drain(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => return Poll::Pending,
            }

            loop {
                me.out_pos = 0;
                me.out_len = 0;
                let before_out = me.compress.total_out();

                let status = me
                    .compress
                    .compress(&[], &mut me.out_buf, FlushCompress::Finish)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                me.out_len = (me.compress.total_out() - before_out) as usize;

                match me.poll_drain(cx) {
                    Poll::Ready(Ok(())) => {}
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => return Poll::Pending,
                }

                if status == Status::StreamEnd {
                    break;
                }
            }
        }

        Pin::new(&mut me.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn disabled_compressor_passes_bytes_through() {
        let (a, mut b) = duplex(1024);
        let mut compressor = Compressor::new(a, Compression::default());

        compressor.write_all(b"hello").await.unwrap();
        compressor.flush().await.unwrap();

        let mut received = [0u8; 5];
        b.read_exact(&mut received).await.unwrap();
        assert_eq!(&received, b"hello");
    }

    #[tokio::test]
    async fn compressed_round_trips_through_decompressor() {
        let (a, b) = duplex(65536);
        let mut compressor = Compressor::new(a, Compression::default());
        compressor.enable();
        let mut decompressor = Decompressor::new(b);
        decompressor.enable();

        let payload = b"<message><body>zlib round trip</body></message>".repeat(20);
        let write_payload = payload.clone();

        let writer = tokio::spawn(async move {
            compressor.write_all(&write_payload).await.unwrap();
            compressor.flush().await.unwrap();
        });

        let mut received = vec![0u8; payload.len()];
        decompressor.read_exact(&mut received).await.unwrap();
        writer.await.unwrap();

        assert_eq!(received, payload);
    }
}
