mod args;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use convoy::admission::Admission;
use convoy::line_reader::LineReader;
use convoy::media::{CommandSource, DirectorySink, MediaSource, ProviderChain};
use convoy::parser::ParsingError;
use convoy::pipeline::Pipeline;
use convoy::queue::Queue;
use convoy::scheduler::Scheduler;
use convoy::service::Frontend;
use convoy::store::{JobStore, MemoryStore};
use convoy::types::job::NewJob;
use convoy::types::protocol::{Command, Response};
use convoy::types::serialisable::WireSerialisable;
use convoy::util::bytes_to_human_str;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Level};

use crate::args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    // Cancellation and termination channel. Every long-lived task holds a
    // sender; the process exits once all of them are dropped.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    let exit_code = if let Err(error) =
        begin(args, cancel.clone(), shutdown_hold).await
    {
        error!(error = %format!("{error:#}"), "encountered runtime error");
        cancel.cancel();
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };

    shutdown_wait.recv().await;

    exit_code
}

async fn begin(
    args: Args,
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
) -> Result<()> {
    let store: Arc<dyn JobStore> = Arc::new(MemoryStore::new());
    let queue = Arc::new(Queue::new());
    let admission = Admission::new(store.clone(), queue.clone());

    admission
        .recover_queued()
        .await
        .context("re-queueing stranded jobs")?;

    let download_timeout = Duration::from_secs(args.download_timeout_secs);
    let providers = args
        .downloaders
        .iter()
        .map(|program| -> Arc<dyn MediaSource> {
            Arc::new(CommandSource::new(
                program.as_str(),
                args.source_url_prefix.as_str(),
                download_timeout,
            ))
        })
        .collect();
    let sink = DirectorySink::new(
        &args.publish_dir,
        args.public_base_url.as_str(),
        Duration::from_secs(args.upload_timeout_secs),
    );
    let pipeline = Pipeline::new(
        ProviderChain::new(providers),
        Arc::new(sink),
        args.pipeline_config(),
    );

    let scheduler = Scheduler::new(
        store.clone(),
        queue.clone(),
        pipeline,
        args.scheduler_config(),
    );
    let frontend = Frontend::new(
        admission,
        store,
        queue,
        scheduler.in_flight(),
        args.max_batch,
    );

    {
        let cancel = cancel.clone();
        let hold = shutdown_hold.clone();
        tokio::spawn(async move {
            scheduler.run(cancel).await;
            drop(hold);
        });
    }

    let listener = TcpListener::bind((args.listen, args.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    // Accept incoming connections until an exit signal is sent, and handle each
    // connection as its own task.
    loop {
        let conn = match select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => break,
        } {
            Ok((conn, _)) => conn,
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        };

        tokio::spawn(begin_handle(
            cancel.clone(),
            shutdown_hold.clone(),
            frontend.clone(),
            conn,
        ));
    }

    Ok(())
}

#[instrument(name = "handle", err, fields(peer = %conn.peer_addr()?), skip_all)]
async fn begin_handle(
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    frontend: Frontend,
    mut conn: TcpStream,
) -> Result<()> {
    debug!("accepted connection");

    conn.set_nodelay(true).context("setting NODELAY")?;

    let ret = handle_conn(cancel, &frontend, &mut conn).await;

    conn.shutdown().await.context("during shutdown")?;

    debug!("closed connection");

    ret
}

async fn handle_conn(
    cancel: CancellationToken,
    frontend: &Frontend,
    conn: &mut TcpStream,
) -> Result<()> {
    // Split conn into read and write halves, where the read half uses our
    // LineReader.
    let (r, mut w) = conn.split();
    let mut r: LineReader<_> = r.into();

    // Keep taking lines and parsing and processing them.
    loop {
        let line = select!(
           x = r.read_line() => match x? {
                Some(x) => x,
                None => return Ok(()),
           },
           _ = cancel.cancelled() => return Ok(()),
        );

        trace!(line = bytes_to_human_str(&line), "processing command");

        let cmd: Result<Command, ParsingError> = (&line as &[u8]).try_into();

        let resp = match cmd {
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::ConvertBatch { count }) => {
                // The announced lines are always consumed, even when the batch
                // is refused, so the stream stays in step.
                let admit = frontend.admits_batch(count);
                let mut jobs = Vec::new();

                for _ in 0..count {
                    let line = select!(
                       x = r.read_line() => match x? {
                            Some(x) => x,
                            None => return Ok(()),
                       },
                       _ = cancel.cancelled() => return Ok(()),
                    );

                    if admit {
                        jobs.push(NewJob::try_from(&line as &[u8]));
                    }
                }

                let resp = if admit {
                    frontend.execute_batch(jobs).await
                } else {
                    Response::BatchTooBig
                };
                resp.serialise_wire()
            },
            Ok(cmd) => frontend.execute(cmd).await.serialise_wire(),
            Err(error) => error.serialise_wire(),
        };

        // Slightly convoluted, but ensures we write out the buffer properly
        // with cancel safety.
        select! {
            x = w.write_all(&resp) => x?,
            _ = cancel.cancelled() => return Ok(()),
        };

        // Flush any buffered packets once we've written out the one or more
        // responses. This provides a pipelined response to a pipelined request.
        select! {
            x = w.flush() => x?,
            _ = cancel.cancelled() => return Ok(()),
        };
    }
}
