//! View service network-facing reactor module implementation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_bind_with_retry, ViewServError,
};
use crate::viewsvc::{ServerId, View, ViewManager, ViewNum, ViewStatus};

use bytes::BytesMut;

use serde::{Deserialize, Serialize};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Connection ID type, assigned by the reactor to each accepted connection.
pub type ConnId = u64;

/// Request to the view service.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ViewRequest {
    /// Server `me` reports liveness, claiming it has seen view `viewnum`.
    Ping { me: ServerId, viewnum: ViewNum },

    /// Query the current view without reporting liveness.
    Get,

    /// Query a diagnostic snapshot of the whole manager state.
    Status,

    /// Connection leave notification.
    Leave,
}

/// Reply from the view service.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ViewReply {
    /// Reply to `Ping` and `Get`.
    View(View),

    /// Reply to `Status`.
    Status(ViewStatus),

    /// Reply to leave notification.
    Leave,
}

/// The network-facing reactor module. Owns the acceptor task, which in turn
/// owns one responder task per connection.
pub(crate) struct ViewReactor {
    /// Actual bound listening address.
    local_addr: SocketAddr,

    /// Join handle of the acceptor task.
    _acceptor_handle: JoinHandle<()>,
}

impl ViewReactor {
    /// Binds the listener and spawns the acceptor task, which runs until
    /// `rx_term` signals.
    pub(crate) async fn new_and_setup(
        bind_addr: SocketAddr,
        manager: Arc<ViewManager>,
        rx_term: watch::Receiver<bool>,
    ) -> Result<Self, ViewServError> {
        let listener = tcp_bind_with_retry(bind_addr, 10).await?;
        let local_addr = listener.local_addr()?;

        let mut acceptor =
            ViewReactorAcceptorTask::new(manager, listener, rx_term);
        let acceptor_handle = tokio::spawn(async move { acceptor.run().await });

        Ok(ViewReactor {
            local_addr,
            _acceptor_handle: acceptor_handle,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// ViewReactor connection acceptor task.
struct ViewReactorAcceptorTask {
    manager: Arc<ViewManager>,
    listener: TcpListener,
    responder_handles: HashMap<ConnId, JoinHandle<()>>,

    next_conn_id: ConnId,

    tx_exit: mpsc::UnboundedSender<ConnId>,
    rx_exit: mpsc::UnboundedReceiver<ConnId>,

    rx_term: watch::Receiver<bool>,
}

impl ViewReactorAcceptorTask {
    fn new(
        manager: Arc<ViewManager>,
        listener: TcpListener,
        rx_term: watch::Receiver<bool>,
    ) -> Self {
        // create an exit mpsc channel for getting notified about termination
        // of responder tasks
        let (tx_exit, rx_exit) = mpsc::unbounded_channel();

        ViewReactorAcceptorTask {
            manager,
            listener,
            responder_handles: HashMap::new(),
            next_conn_id: 1,
            tx_exit,
            rx_exit,
            rx_term,
        }
    }

    /// Accepts a new connection.
    async fn accept_new_conn(
        &mut self,
        mut stream: TcpStream,
        addr: SocketAddr,
        id: ConnId,
    ) -> Result<(), ViewServError> {
        // send connection ID assignment
        if let Err(e) = stream.write_u64(id).await {
            return logged_err!("error assigning new conn ID: {}", e);
        }
        if self.responder_handles.contains_key(&id) {
            return logged_err!("duplicate conn ID listened: {}", id);
        }
        pf_debug!("accepted new conn {} '{}'", id, addr);

        let mut responder = ViewReactorResponderTask::new(
            id,
            addr,
            stream,
            self.manager.clone(),
            self.tx_exit.clone(),
        );
        let responder_handle =
            tokio::spawn(async move { responder.run().await });
        self.responder_handles.insert(id, responder_handle);
        Ok(())
    }

    /// Starts the acceptor task loop.
    async fn run(&mut self) {
        pf_debug!("acceptor task spawned");
        match self.listener.local_addr() {
            Ok(local_addr) => pf_info!("accepting pings on '{}'", local_addr),
            Err(e) => pf_warn!("error getting listener address: {}", e),
        }

        loop {
            tokio::select! {
                // new connection
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            pf_warn!("error accepting connection: {}", e);
                            continue;
                        }
                    };
                    let id = self.next_conn_id;
                    if let Err(e) = self.accept_new_conn(stream, addr, id).await {
                        pf_error!("error accepting new conn: {}", e);
                    } else {
                        self.next_conn_id += 1;
                    }
                },

                // a responder task exits
                id = self.rx_exit.recv() => {
                    if let Some(id) = id {
                        if self.responder_handles.remove(&id).is_none() {
                            pf_error!("conn {} not found among active ones", id);
                        }
                    }
                },

                // termination signal
                _ = self.rx_term.changed() => {
                    pf_debug!("acceptor caught termination signal");
                    break;
                }
            }
        }

        for (_, handle) in self.responder_handles.drain() {
            handle.abort();
        }
        pf_debug!("acceptor task exited");
    }
}

/// ViewReactor per-connection responder task.
struct ViewReactorResponderTask {
    id: ConnId,
    addr: SocketAddr,

    conn_read: OwnedReadHalf,
    conn_write: OwnedWriteHalf,

    manager: Arc<ViewManager>,
    req_buf: BytesMut,

    reply_buf: BytesMut,
    reply_buf_cursor: usize,
    retrying: bool,

    tx_exit: mpsc::UnboundedSender<ConnId>,
}

impl ViewReactorResponderTask {
    fn new(
        id: ConnId,
        addr: SocketAddr,
        conn: TcpStream,
        manager: Arc<ViewManager>,
        tx_exit: mpsc::UnboundedSender<ConnId>,
    ) -> Self {
        let (conn_read, conn_write) = conn.into_split();

        ViewReactorResponderTask {
            id,
            addr,
            conn_read,
            conn_write,
            manager,
            req_buf: BytesMut::with_capacity(8 + 1024),
            reply_buf: BytesMut::with_capacity(8 + 1024),
            reply_buf_cursor: 0,
            retrying: false,
            tx_exit,
        }
    }

    /// Reads a request from given connection.
    /// This is a non-method function to ease `tokio::select!` sharing.
    async fn read_req(
        req_buf: &mut BytesMut,
        conn_read: &mut OwnedReadHalf,
    ) -> Result<ViewRequest, ViewServError> {
        safe_tcp_read(req_buf, conn_read).await
    }

    /// Writes a reply, or retries the last unfinished one if `reply` is
    /// `None`. Sets the retrying flag accordingly.
    fn write_reply(
        &mut self,
        reply: Option<&ViewReply>,
    ) -> Result<(), ViewServError> {
        let done = safe_tcp_write(
            &mut self.reply_buf,
            &mut self.reply_buf_cursor,
            &self.conn_write,
            reply,
        )?;
        if done && self.retrying {
            pf_debug!("finished retrying last reply send -> {}", self.id);
        } else if !done && !self.retrying {
            pf_debug!("should start retrying reply send -> {}", self.id);
        }
        self.retrying = !done;
        Ok(())
    }

    /// Serves a request against the shared view manager.
    fn handle_req(&self, req: ViewRequest) -> ViewReply {
        match req {
            ViewRequest::Ping { me, viewnum } => {
                pf_trace!("ping <- {} '{}' viewnum {}", self.id, me, viewnum);
                ViewReply::View(self.manager.ping(&me, viewnum))
            }
            ViewRequest::Get => ViewReply::View(self.manager.get()),
            ViewRequest::Status => ViewReply::Status(self.manager.status()),
            ViewRequest::Leave => ViewReply::Leave,
        }
    }

    /// Starts a per-connection responder task loop.
    async fn run(&mut self) {
        pf_debug!("responder task for {} '{}' spawned", self.id, self.addr);

        loop {
            tokio::select! {
                // retrying last unsuccessful reply send
                _ = self.conn_write.writable(), if self.retrying => {
                    if let Err(e) = self.write_reply(None) {
                        pf_debug!("error retrying reply -> {}: {}", self.id, e);
                        break;
                    }
                },

                // receives request from connection; holds off while a reply
                // is still pending
                req = Self::read_req(&mut self.req_buf, &mut self.conn_read), if !self.retrying => {
                    match req {
                        Ok(ViewRequest::Leave) => {
                            // NOTE: skips `WouldBlock` check on the last reply
                            if let Err(e) = self.write_reply(Some(&ViewReply::Leave)) {
                                pf_debug!("error replying leave -> {}: {}", self.id, e);
                            } else {
                                pf_debug!("conn {} has left", self.id);
                            }
                            break;
                        }

                        Ok(req) => {
                            let reply = self.handle_req(req);
                            if let Err(e) = self.write_reply(Some(&reply)) {
                                pf_debug!("error replying -> {}: {}", self.id, e);
                                break;
                            }
                        }

                        Err(_e) => {
                            // probably the peer exited without leaving
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.tx_exit.send(self.id) {
            pf_error!("error sending exit signal for {}: {}", self.id, e);
        }
        pf_debug!("responder task for {} '{}' exited", self.id, self.addr);
    }
}
