//! The stop protocol.
//!
//! A client connects to the listener's port; that connection is the whole
//! stop request. The listener sets the stop flag, waits for the sampler
//! thread to finish writing its report, and only then closes the connection.
//! The client seeing its connection closed means the report is on disk.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::sampler::StopFlag;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Triggered,
    SamplerStopping,
    SamplerDone,
    Closed,
}

#[derive(Debug)]
pub struct StopListener {
    socket: TcpListener,
    deadline: Option<Duration>,
    state: ListenerState,
}

impl StopListener {
    /// Binds to `127.0.0.1:port`. Port 0 picks a free port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = TcpListener::bind((Ipv4Addr::LOCALHOST, port))?;
        log::debug!("Listening for a stop request on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            deadline: None,
            state: ListenerState::Listening,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Gives up on accepting, and on joining the sampler, after `deadline`
    /// each. Without one, both wait forever.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Waits for one stop request and answers it once `sampler` has exited.
    ///
    /// Returns whatever the sampler thread returned. The connection is
    /// closed on every path out of here, errors included. If no request
    /// arrives, the sampler is stopped anyway and the accept error returned.
    pub fn serve<T>(mut self, stop: &StopFlag, sampler: JoinHandle<Result<T>>) -> Result<T> {
        let connection = match self.accept() {
            Ok(connection) => connection,
            Err(e) => {
                log::warn!("No stop request received: {}", e);
                stop.request_stop();
                self.transition(ListenerState::SamplerStopping);
                if let Err(join_error) = self.join(sampler) {
                    log::warn!("Sampler did not finish cleanly: {}", join_error);
                }
                self.transition(ListenerState::Closed);
                return Err(e);
            }
        };
        self.transition(ListenerState::Triggered);
        stop.request_stop();

        self.transition(ListenerState::SamplerStopping);
        let joined = self.join(sampler);
        self.transition(ListenerState::SamplerDone);

        drop(connection);
        self.transition(ListenerState::Closed);
        joined?
    }

    fn transition(&mut self, to: ListenerState) {
        log::debug!("Stop listener: {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn accept(&self) -> Result<TcpStream> {
        let Some(timeout) = self.deadline else {
            let (stream, peer) = self.socket.accept()?;
            log::debug!("Stop requested by {}", peer);
            return Ok(stream);
        };

        self.socket.set_nonblocking(true)?;
        let until = Instant::now() + timeout;
        loop {
            match self.socket.accept() {
                Ok((stream, peer)) => {
                    log::debug!("Stop requested by {}", peer);
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= until {
                        return Err(Error::TimedOut("waiting for a stop request"));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn join<T>(&self, sampler: JoinHandle<T>) -> Result<T> {
        if let Some(timeout) = self.deadline {
            let until = Instant::now() + timeout;
            while !sampler.is_finished() {
                if Instant::now() >= until {
                    return Err(Error::TimedOut("waiting for the sampler to finish"));
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        sampler
            .join()
            .map_err(|_| Error::ThreadPanicked("sampler"))
    }
}

/// Asks the profiler listening on `addr` to stop, and blocks until it has
/// written its report.
pub fn trigger_stop<A: ToSocketAddrs>(addr: A) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    // Nothing is ever sent; we only wait for the close.
    let mut buf = vec![];
    match stream.read_to_end(&mut buf) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => Ok(()),
        Err(e) => Err(e),
    }
}
