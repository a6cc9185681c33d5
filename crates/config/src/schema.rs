use {
    secrecy::SecretString,
    serde::Deserialize,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub api: ApiSection,
    pub pipeline: PipelineSection,
    pub storage: StorageSection,
}

/// External API access.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Bot credential. Usually supplied via `COURIER_API_TOKEN` or a
    /// `${...}` placeholder rather than written into the file.
    pub token: Option<SecretString>,
    /// API host; the per-bot path is appended by the client.
    pub endpoint: Option<String>,
    /// Server-side long-poll wait, in seconds.
    pub poll_timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: None,
            poll_timeout_secs: 30,
        }
    }
}

/// Pipeline tuning knobs, all with workable defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Upper bound on concurrently running workers.
    pub max_workers: usize,
    /// Work-queue depth one worker is expected to absorb; the scaling
    /// signal divides the backlog by this.
    pub batch_threshold: usize,
    /// Interval between scaling evaluations, in milliseconds.
    pub scale_tick_ms: u64,
    /// Minimum interval between two sends, in milliseconds.
    pub send_interval_ms: u64,
    /// Minimum interval between two sends to the same destination,
    /// in milliseconds.
    pub per_destination_interval_ms: u64,
    /// How long a worker blocks on the work queue before re-checking its
    /// shutdown signal, in milliseconds.
    pub worker_recv_timeout_ms: u64,
    /// Idle time after which a worker probes the session store to keep its
    /// connection alive, in seconds.
    pub keep_alive_idle_secs: u64,
    /// Delivery attempts per message before it is captured to disk.
    pub max_send_attempts: u32,
    /// How long the audit logger keeps draining after shutdown, in seconds.
    pub audit_flush_grace_secs: u64,
    /// Capacity of the audit queue; producers drop records rather than
    /// block when it is full.
    pub audit_queue_capacity: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_workers: 5,
            batch_threshold: 30,
            scale_tick_ms: 500,
            send_interval_ms: 50,
            per_destination_interval_ms: 1_000,
            worker_recv_timeout_ms: 200,
            keep_alive_idle_secs: 3_600,
            max_send_attempts: 3,
            audit_flush_grace_secs: 5,
            audit_queue_capacity: 1_024,
        }
    }
}

/// Where the cursor, backlog, and audit files live.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Data directory; defaults to the platform data dir for "courier".
    pub data_dir: Option<std::path::PathBuf>,
}
