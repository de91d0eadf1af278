//! Safe TCP bind/connect/read/write helper functions.

use std::io::ErrorKind;
use std::marker::Unpin;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::ViewServError;

/// Length of the big-endian object length header preceding every frame.
const LEN_HDR: usize = 8;

/// Largest object length accepted from a peer; views and replies are tiny.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Receives an object of type `T` from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads. Returns:
///   - `Ok(obj)` if successful; upon returning, the read buffer is cleared
///   - `Err(err)` if any unexpected error occurs
///
/// CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()` here
/// because this function is intended to be used as a `tokio::select!` branch
/// and that those two methods are not cancellation-safe. Instead, in the case
/// of being cancelled midway before receiving the entire object (note that
/// such cancellation can only happen at `.await` points), bytes already read
/// are stored in the read buffer and will continue to be appended by future
/// invocations until successful returning.
pub(crate) async fn safe_tcp_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, ViewServError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    // read length of obj first
    if read_buf.capacity() < LEN_HDR {
        read_buf.reserve(LEN_HDR - read_buf.capacity());
    }
    while read_buf.len() < LEN_HDR {
        // obj_len not wholesomely read from socket before last cancellation
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ViewServError::msg("connection closed by peer"));
        }
    }
    let mut len_bytes = [0u8; LEN_HDR];
    len_bytes.copy_from_slice(&read_buf[..LEN_HDR]);
    let obj_len = usize::try_from(u64::from_be_bytes(len_bytes))
        .map_err(ViewServError::msg)?;
    if obj_len > MAX_FRAME_LEN {
        return Err(ViewServError::msg(format!(
            "frame length {} exceeds limit {}",
            obj_len, MAX_FRAME_LEN
        )));
    }

    // then read the obj itself
    let obj_end = LEN_HDR
        .checked_add(obj_len)
        .ok_or_else(|| ViewServError::msg("frame length overflow"))?;
    if read_buf.capacity() < obj_end {
        // capacity not big enough, reserve more space
        read_buf.reserve(obj_end - read_buf.capacity());
    }
    while read_buf.len() < obj_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ViewServError::msg("connection closed mid-object"));
        }
    }
    let obj = rmp_serde::from_slice(&read_buf[LEN_HDR..obj_end])?;

    // if reached this point, no further cancellation to this call is
    // possible (because there are no more awaits ahead); discard bytes
    // used in this call
    if read_buf.len() > obj_end {
        let buf_tail = Bytes::copy_from_slice(&read_buf[obj_end..]);
        read_buf.clear();
        read_buf.extend_from_slice(&buf_tail);
    } else {
        read_buf.clear();
    }

    Ok(obj)
}

/// Sends an object of type `T` to TCP writable connection `conn_write`, using
/// `write_buf` as buffer storage for partial writes. Returns:
///   - `Ok(true)` if successful
///   - `Ok(false)` if socket full and may block; in this case, bytes of the
///     input object is saved in the write buffer, and the next
///     calls must give arg `obj == None` to indicate retrying
///     (typically after the socket becomes writable again), until the
///     function returns success
///   - `Err(err)` if any unexpected error occurs
///
/// DEADLOCK AVOIDANCE: we avoid using `write_u64()` and `write_all()` here
/// because, in the case of TCP buffers being full, if both ends of the
/// connection are trying to write, they may both be blocking on either of
/// these two methods, resulting in a circular deadlock.
pub(crate) fn safe_tcp_write<T, Conn>(
    write_buf: &mut BytesMut,
    write_buf_cursor: &mut usize,
    conn_write: &Conn,
    obj: Option<&T>,
) -> Result<bool, ViewServError>
where
    T: Serialize,
    Conn: AsRef<TcpStream>,
{
    // if last write was not successful, cannot send a new object
    if obj.is_some() && !write_buf.is_empty() {
        return Err(ViewServError::msg(
            "attempting new object while should retry",
        ));
    } else if obj.is_none() && write_buf.is_empty() {
        return Err(ViewServError::msg(
            "attempting to retry while buffer is empty",
        ));
    } else if let Some(obj) = obj {
        // sending a new object, fill write_buf
        debug_assert_eq!(*write_buf_cursor, 0);
        let write_bytes = rmp_serde::to_vec(obj)?;
        let write_len = write_bytes.len() as u64;
        write_buf.extend_from_slice(&write_len.to_be_bytes());
        debug_assert_eq!(write_buf.len(), LEN_HDR);
        write_buf.extend_from_slice(write_bytes.as_slice());
    } else {
        // retrying last unsuccessful write
        debug_assert!(*write_buf_cursor < write_buf.len());
    }

    // try until the length + the object are all written
    while *write_buf_cursor < write_buf.len() {
        match conn_write
            .as_ref()
            .try_write(&write_buf[*write_buf_cursor..])
        {
            Ok(n) => {
                *write_buf_cursor += n;
            }
            Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }
    }

    // everything written, clear write_buf
    write_buf.clear();
    *write_buf_cursor = 0;

    Ok(true)
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ViewServError> {
    loop {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(bind_addr)?;

        match socket.listen(1024) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                pf_warn!("listen on '{}' failed, retrying: {}", bind_addr, err);
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, ViewServError> {
    loop {
        let socket = TcpSocket::new_v4()?;
        socket.set_nodelay(true)?;

        match socket.connect(conn_addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        tag: String,
        nums: Vec<u64>,
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn framed_back_to_back() -> Result<(), ViewServError> {
        let listener = tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        let sender = tokio::spawn(async move {
            let stream = tcp_connect_with_retry(addr, 3).await?;
            let (_, conn_write) = stream.into_split();
            let mut buf = BytesMut::new();
            let mut cursor = 0;
            for i in 0..3 {
                let blob = Blob {
                    tag: format!("blob-{}", i),
                    nums: vec![i; 4],
                };
                let mut done = safe_tcp_write(
                    &mut buf,
                    &mut cursor,
                    &conn_write,
                    Some(&blob),
                )?;
                while !done {
                    conn_write.writable().await?;
                    done = safe_tcp_write::<Blob, _>(
                        &mut buf,
                        &mut cursor,
                        &conn_write,
                        None,
                    )?;
                }
            }
            Ok::<(), ViewServError>(())
        });

        let (stream, _) = listener.accept().await?;
        let (mut conn_read, _) = stream.into_split();
        let mut buf = BytesMut::new();
        for i in 0..3 {
            let blob: Blob = safe_tcp_read(&mut buf, &mut conn_read).await?;
            assert_eq!(blob.tag, format!("blob-{}", i));
            assert_eq!(blob.nums, vec![i; 4]);
        }
        sender.await.map_err(ViewServError::msg)??;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn oversized_frame_rejected() -> Result<(), ViewServError> {
        use tokio::io::AsyncWriteExt;

        let listener = tcp_bind_with_retry("127.0.0.1:0".parse()?, 0).await?;
        let addr = listener.local_addr()?;
        let sender = tokio::spawn(async move {
            let mut stream = tcp_connect_with_retry(addr, 3).await?;
            stream.write_u64(1 << 40).await?;
            Ok::<TcpStream, ViewServError>(stream)
        });

        let (stream, _) = listener.accept().await?;
        let (mut conn_read, _) = stream.into_split();
        let mut buf = BytesMut::new();
        let res: Result<Blob, _> = safe_tcp_read(&mut buf, &mut conn_read).await;
        assert!(res.is_err());
        assert!(buf.capacity() <= LEN_HDR + MAX_FRAME_LEN);
        sender.await.map_err(ViewServError::msg)??;
        Ok(())
    }
}
