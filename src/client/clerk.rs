//! Client -> view server request stub implementation.

use std::net::SocketAddr;

use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_with_retry, ViewServError,
};
use crate::viewsvc::{
    ConnId, ServerId, View, ViewNum, ViewReply, ViewRequest, ViewStatus,
};

use bytes::BytesMut;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Client -> view server request stub. Issues one request at a time and
/// waits for its reply.
pub struct ViewClerk {
    /// Connection ID assigned by the view server.
    pub id: ConnId,

    /// Write-half split of the TCP connection stream.
    conn_write: OwnedWriteHalf,

    /// Request write buffer for deadlock avoidance.
    req_buf: BytesMut,

    /// Request write buffer cursor at first unwritten byte.
    req_buf_cursor: usize,

    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,

    /// Reply read buffer for cancellation safety.
    reply_buf: BytesMut,
}

impl ViewClerk {
    /// Creates a new stub and connects to the view server.
    pub async fn new_by_connect(
        server: SocketAddr,
    ) -> Result<Self, ViewServError> {
        pf_debug!("connecting to view server '{}'...", server);
        let mut stream = tcp_connect_with_retry(server, 10).await?;
        let id = stream.read_u64().await?; // receive my connection ID
        let (read_half, write_half) = stream.into_split();

        Ok(ViewClerk {
            id,
            conn_write: write_half,
            req_buf: BytesMut::with_capacity(8 + 1024),
            req_buf_cursor: 0,
            conn_read: read_half,
            reply_buf: BytesMut::with_capacity(8 + 1024),
        })
    }

    /// Sends a request, waiting for socket writability if the TCP buffer is
    /// full.
    async fn send_req(&mut self, req: &ViewRequest) -> Result<(), ViewServError> {
        let mut done = safe_tcp_write(
            &mut self.req_buf,
            &mut self.req_buf_cursor,
            &self.conn_write,
            Some(req),
        )?;
        while !done {
            pf_debug!("send_req would block; TCP buffer full?");
            self.conn_write.writable().await?;
            done = safe_tcp_write::<ViewRequest, _>(
                &mut self.req_buf,
                &mut self.req_buf_cursor,
                &self.conn_write,
                None,
            )?;
        }
        Ok(())
    }

    /// Receives a reply from established connection.
    async fn recv_reply(&mut self) -> Result<ViewReply, ViewServError> {
        safe_tcp_read(&mut self.reply_buf, &mut self.conn_read).await
    }

    /// Issues a request that is answered with a view.
    async fn call_for_view(
        &mut self,
        req: ViewRequest,
    ) -> Result<View, ViewServError> {
        self.send_req(&req).await?;
        match self.recv_reply().await? {
            ViewReply::View(view) => Ok(view),
            reply => logged_err!("unexpected reply to {:?}: {:?}", req, reply),
        }
    }

    /// Pings as server `me`, claiming to have seen view `viewnum`. Returns
    /// the view server's current view.
    pub async fn ping(
        &mut self,
        me: &ServerId,
        viewnum: ViewNum,
    ) -> Result<View, ViewServError> {
        self.call_for_view(ViewRequest::Ping {
            me: me.clone(),
            viewnum,
        })
        .await
    }

    /// Fetches the current view without reporting liveness.
    pub async fn get(&mut self) -> Result<View, ViewServError> {
        self.call_for_view(ViewRequest::Get).await
    }

    /// Shortcut for the current primary.
    pub async fn primary(&mut self) -> Result<ServerId, ViewServError> {
        Ok(self.get().await?.primary)
    }

    /// Fetches a diagnostic snapshot of the view manager.
    pub async fn status(&mut self) -> Result<ViewStatus, ViewServError> {
        self.send_req(&ViewRequest::Status).await?;
        match self.recv_reply().await? {
            ViewReply::Status(status) => Ok(status),
            reply => logged_err!("unexpected reply to Status: {:?}", reply),
        }
    }

    /// Notifies the view server of leaving and closes the connection.
    pub async fn leave(mut self) -> Result<(), ViewServError> {
        self.send_req(&ViewRequest::Leave).await?;
        match self.recv_reply().await? {
            ViewReply::Leave => {
                pf_debug!("left view server connection {}", self.id);
                Ok(())
            }
            reply => logged_err!("unexpected reply to Leave: {:?}", reply),
        }
    }
}

// Request/reply behavior over the wire is tested together with
// `viewsvc::reactor`.
