use std::io::{self, BufWriter};

use anyhow::{bail, Context};
use qdrain::{
    AttributeMapper, CsvSink, DrainReport, Drainer, JsonLinesSink, Queue, QueueSink,
    QueueTransport, Settings, Sink, SqsTransport, Tee, TransferPolicy,
};

use crate::Format;

/// Builds the transport. Fails before any queue call when credentials are
/// missing.
pub async fn connect(region: Option<&str>, endpoint: Option<&str>) -> anyhow::Result<SqsTransport> {
    let settings = Settings::from_env(region, endpoint)?;
    Ok(SqsTransport::from_config(settings.load().await))
}

async fn open(transport: &SqsTransport, name: &str) -> anyhow::Result<Queue> {
    Queue::open(transport, name)
        .await
        .with_context(|| format!("cannot open queue '{name}'"))
}

fn warn_about_delete_failures(report: &DrainReport, queue: &Queue) {
    if !report.delete_failures.is_empty() {
        log::warn!(
            "{} messages could not be deleted from {} and will be drained again by a later run",
            report.delete_failures.len(),
            queue.name
        );
    }
}

pub async fn drain_to_table(
    transport: &SqsTransport,
    queue: &str,
    format: Format,
    restore: bool,
    batch_size: usize,
) -> anyhow::Result<()> {
    let source = open(transport, queue).await?;
    let out = BufWriter::new(io::stdout());

    let render: Box<dyn Sink + '_> = match format {
        Format::Csv => Box::new(CsvSink::new(out, source.mode)?),
        Format::Jsonl => Box::new(JsonLinesSink::new(out)),
    };

    let drainer = Drainer::new(transport, &source).batch_size(batch_size);
    let report = if restore {
        // the restored copies must not be received again by this same run
        let restore = QueueSink::new(
            transport,
            &source,
            AttributeMapper::default(),
            TransferPolicy::DeferredSend,
        );
        drainer.run(&mut Tee::new(render, restore)).await?
    } else {
        let mut render = render;
        drainer.run(&mut render).await?
    };

    warn_about_delete_failures(&report, &source);
    if restore && !report.rejected.is_empty() {
        log::warn!(
            "{} messages could not be restored and were left on {}",
            report.rejected.len(),
            source.name
        );
    }
    Ok(())
}

pub async fn redrive(
    transport: &SqsTransport,
    from: &str,
    to: &str,
    deferred: bool,
    delay_seconds: i32,
) -> anyhow::Result<()> {
    let source = open(transport, from).await?;
    let destination = open(transport, to).await?;

    let mut policy = if deferred {
        TransferPolicy::DeferredSend
    } else {
        TransferPolicy::ConfirmedSend
    };
    if source.url == destination.url && policy == TransferPolicy::ConfirmedSend {
        log::warn!("source and destination are the same queue, sending only after it is drained");
        policy = TransferPolicy::DeferredSend;
    }

    let mut sink = QueueSink::new(
        transport,
        &destination,
        AttributeMapper::with_delay(delay_seconds),
        policy,
    );
    let report = Drainer::new(transport, &source)
        .run(&mut sink)
        .await
        .with_context(|| format!("redrive from {} to {} failed", source.name, destination.name))?;

    warn_about_delete_failures(&report, &source);

    for item in &report.rejected {
        log::error!("message {} was not transferred: {}", item.message_id, item.error);
    }
    let untransferred = report.rejected.len() + report.unconfirmed.len();
    if untransferred > 0 {
        let detail = report
            .transfer
            .as_ref()
            .map(|t| format!(" ({t})"))
            .unwrap_or_default();
        bail!(
            "{untransferred} messages were not transferred to {} and remain on {}{detail}",
            destination.name,
            source.name
        );
    }

    Ok(())
}

pub async fn list(transport: &SqsTransport, prefix: Option<&str>) -> anyhow::Result<()> {
    for url in transport.list_queues(prefix).await? {
        println!("{url}");
    }
    Ok(())
}
