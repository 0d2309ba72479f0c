use shared::metrics_defs::{MetricDef, MetricType};

pub const UPLOADS_INFLIGHT: MetricDef = MetricDef {
    name: "uploads.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of uploads currently being relayed",
};

pub const UPLOAD_ATTEMPTS: MetricDef = MetricDef {
    name: "upload.attempts",
    metric_type: MetricType::Counter,
    description: "Outbound upload attempts. Tagged with result.",
};

pub const UPLOAD_DURATION: MetricDef = MetricDef {
    name: "upload.duration",
    metric_type: MetricType::Histogram,
    description: "Time from receiving an upload to answering it, in seconds. Tagged with kind, status.",
};

pub const JOB_POLLS: MetricDef = MetricDef {
    name: "job.polls",
    metric_type: MetricType::Counter,
    description: "Job status requests issued to the controller",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPLOADS_INFLIGHT,
    UPLOAD_ATTEMPTS,
    UPLOAD_DURATION,
    JOB_POLLS,
];
