//! Connection / Queue - producer と listener が使う queue の参照
//!
//! `Connection` は認証済みの transport handle と project 名の組。
//! `Queue` はその上の 1 つの queue 名を指します。

use std::fmt;
use std::sync::Arc;

use crate::domain::{DeferError, SendTask, TransportError};
use crate::ports::{PubSubTransport, StreamingTransport};
use crate::typed::{Arg, Function};

/// Which family of transport a connection uses.
#[derive(Clone)]
pub enum Transport {
    /// Bidirectional stream with per-task acks.
    Streaming(Arc<dyn StreamingTransport>),
    /// Fire-and-forget channel, no acks.
    PubSub(Arc<dyn PubSubTransport>),
}

impl Transport {
    pub fn kind(&self) -> &'static str {
        match self {
            Transport::Streaming(_) => "streaming",
            Transport::PubSub(_) => "pubsub",
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    project: String,
    transport: Transport,
}

impl Connection {
    pub fn new(project: impl Into<String>, transport: Transport) -> Self {
        Self {
            project: project.into(),
            transport,
        }
    }

    pub fn streaming(project: impl Into<String>, transport: Arc<dyn StreamingTransport>) -> Self {
        Self::new(project, Transport::Streaming(transport))
    }

    pub fn pubsub(project: impl Into<String>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self::new(project, Transport::PubSub(transport))
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn queue(&self, name: impl Into<String>) -> Queue {
        Queue {
            conn: self.clone(),
            name: name.into(),
        }
    }
}

/// A named queue on a connection.
#[derive(Debug, Clone)]
pub struct Queue {
    conn: Connection,
    name: String,
}

impl Queue {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project(&self) -> &str {
        self.conn.project()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Submit a batch of tasks. An empty batch is a no-op.
    pub async fn send_tasks(&self, tasks: Vec<SendTask>) -> Result<(), TransportError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let count = tasks.len();
        match &self.conn.transport {
            Transport::Streaming(t) => t.send_tasks(&self.conn.project, &self.name, tasks).await?,
            Transport::PubSub(t) => t.send_tasks(&self.conn.project, &self.name, tasks).await?,
        }
        tracing::debug!(
            project = %self.conn.project,
            queue = %self.name,
            count,
            "tasks sent"
        );
        Ok(())
    }
}

impl Function {
    /// Build one task and send it to `queue` right away.
    pub async fn call(&self, queue: &Queue, args: Vec<Arg>) -> Result<(), DeferError> {
        let task = self.task(args)?;
        queue.send_tasks(vec![task]).await?;
        Ok(())
    }
}
