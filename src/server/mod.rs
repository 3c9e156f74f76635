//! Judge session server
//!
//! Owns the judge's process-wide resources (shared-memory segment, database
//! connection, engine) and serves judging sessions over TCP until a
//! shutdown signal arrives.

pub mod protocol;

use std::future::Future;
use std::net::SocketAddr;

use sqlx::PgPool;
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::db::{DatabaseConnection, PgDriver};
use crate::engine::{JudgingEngine, PgResultChecker, PgTableLoader, ProcessSolutionRunner};
use crate::error::ServerError;
use crate::models::ProblemNumber;
use crate::shm::SharedMemorySegment;
use crate::state::JudgeState;

pub use protocol::{ProtocolError, Request, Response};

/// The judge server
pub struct Server {
    config: Config,
    database: DatabaseConnection<PgDriver>,
    state: JudgeState<PgPool>,
}

impl Server {
    /// Acquire the shared-memory segment and build the engine around it
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let shm = &config.shared_memory;
        let segment = SharedMemorySegment::acquire(&shm.name, shm.size)?;
        let runner = ProcessSolutionRunner::new(config.execution.clone(), segment.name());

        let engine = JudgingEngine::new(
            segment,
            shm.result_capacity,
            Box::new(PgTableLoader),
            Box::new(PgResultChecker::new()),
            Box::new(runner),
        )?;

        Ok(Self {
            database: DatabaseConnection::new(PgDriver::new(&config.database)),
            state: JudgeState::new(engine),
            config,
        })
    }

    pub fn state(&self) -> &JudgeState<PgPool> {
        &self.state
    }

    /// Connect to the problem database and stage every problem's tables
    pub async fn prepare_trainer_database(&mut self) -> Result<(), ServerError> {
        let db = &self.config.database;
        if !self.database.connect(&db.user, &db.password).await {
            return Err(ServerError::ConnectionFailure {
                user: db.user.clone(),
            });
        }

        let pool = self.database.connection()?.pool()?.clone();
        self.state.engine().await.prepare_tables(&pool).await?;
        Ok(())
    }

    /// Bind the listening socket and serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;

        tracing::info!("Judge listening on {}", addr);
        serve(listener, self.state.clone(), shutdown).await;
        Ok(())
    }

    /// Release the segment and disconnect. Returns whether both succeeded.
    pub async fn shutdown(&mut self) -> bool {
        let released = match self.state.engine().await.shutdown() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to release shared memory: {}", e);
                false
            }
        };

        let disconnected = self.database.disconnect().await;
        if !disconnected {
            tracing::error!("Failed to disconnect from the problem database");
        }

        released && disconnected
    }
}

/// Accept sessions on `listener` until `shutdown` resolves
pub async fn serve<C, F>(listener: TcpListener, state: JudgeState<C>, shutdown: F)
where
    C: Sync + Send + 'static,
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, no longer accepting sessions");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::info!(%peer, "Session opened");
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_session(stream, peer, state).await {
                                tracing::warn!(%peer, "Session ended with error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

/// What one session has judged so far.
///
/// A CHECK answers from the session's own last run, so another session's
/// PREPARE or RUN in between cannot change it.
#[derive(Debug, Default)]
struct Session {
    last_verdict: Option<(ProblemNumber, Vec<u8>)>,
}

impl Session {
    fn record(&mut self, request: Request, response: &Response) {
        match (request, response) {
            (Request::Run(problem), Response::Verdict(bytes)) => {
                self.last_verdict = Some((problem, bytes.clone()));
            }
            (Request::Run(_) | Request::Prepare(_), _) => self.last_verdict = None,
            (Request::Check(_), _) => {}
        }
    }

    fn recheck(&self, problem: ProblemNumber) -> Option<Response> {
        match &self.last_verdict {
            Some((judged, bytes)) if *judged == problem => Some(Response::Verdict(bytes.clone())),
            _ => None,
        }
    }
}

async fn handle_session<C: Sync>(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: JudgeState<C>,
) -> Result<(), ProtocolError> {
    let mut session = Session::default();

    loop {
        let request = match protocol::read_request(&mut stream).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                tracing::info!(%peer, "Session closed");
                return Ok(());
            }
            Err(ProtocolError::UnknownOpcode(opcode)) => {
                tracing::warn!(%peer, opcode, "Unknown opcode, closing session");
                let response = Response::failure(
                    protocol::BAD_REQUEST,
                    format!("unknown opcode {:#04x}", opcode),
                );
                return protocol::write_response(&mut stream, &response).await;
            }
            Err(e) => return Err(e),
        };

        let response = match request {
            Request::Check(problem) => match session.recheck(problem) {
                Some(response) => response,
                None => dispatch(&state, request).await,
            },
            _ => dispatch(&state, request).await,
        };
        session.record(request, &response);
        protocol::write_response(&mut stream, &response).await?;
    }
}

async fn dispatch<C: Sync>(state: &JudgeState<C>, request: Request) -> Response {
    let mut engine = state.engine().await;
    let outcome = match request {
        Request::Run(problem) => engine.run_solution(problem).await.map(Response::Verdict),
        Request::Prepare(problem) => engine.prepare_debug(problem).map(|()| Response::Ack),
        Request::Check(problem) => engine.check_result(problem).map(Response::Verdict),
    };

    outcome.unwrap_or_else(|e| {
        tracing::error!(
            problem = request.problem(),
            code = e.error_code(),
            "Judging failed: {}",
            e
        );
        Response::from(&e)
    })
}
