use crate::chart::sparkline;
use crate::classify::Severity;
use crate::series::Channel;
use crate::snapshot::WindowStats;
use crate::state::{DashboardStatus, DashboardView};
use std::time::{Duration, UNIX_EPOCH};

const SPARK_CHANNELS: [(Channel, &str); 5] = [
    (Channel::CpuPercent, "CPU %"),
    (Channel::MemoryPercent, "Memory %"),
    (Channel::DiskPercent, "Disk %"),
    (Channel::Requests, "Requests/1m"),
    (Channel::AvgResponseMs, "Avg ms"),
];

/// Plain-text dashboard used by `--once`.
pub fn format_dashboard(view: &DashboardView) -> String {
    let mut out = vec![format!(
        "{} adminmon: {}",
        severity_mark(view.severity),
        status_title(view.status)
    )];

    if let Some(err) = view.error.as_ref() {
        out.push(format!("! {err}"));
    }

    let Some(metrics) = view.metrics.as_ref() else {
        if view.error.is_none() {
            out.push("Loading metrics...".to_string());
        }
        return out.join("\n");
    };

    out.push(String::new());
    out.push(format!("Requests (15m):     {}", metrics.totals.requests_15m));
    out.push(format!(
        "Active users (15m): {}",
        metrics.totals.active_users_15m
    ));
    out.push(format!(
        "Online (1m):        {} users, {} clients",
        metrics.totals.online_users_1m, metrics.totals.online_clients_1m
    ));
    out.push(format!(
        "Generated at:       {}",
        format_unix(metrics.generated_at)
    ));

    out.push(String::new());
    out.push(window_line("Last 1m", &metrics.last_1m));
    out.push(window_line("Last 5m", &metrics.last_5m));

    if let Some(classes) = view.status_classes.as_ref() {
        let parts = classes
            .classes()
            .iter()
            .map(|(class, count)| format!("{class}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        out.push(format!("Status codes (15m): {parts} ({} total)", classes.total()));
    }

    match view.system.as_ref() {
        Some(sys) => {
            out.push(String::new());
            out.push(format!(
                "CPU:    {:.1}% ({} cores)",
                sys.cpu.percent, sys.cpu.cores
            ));
            out.push(format!(
                "Memory: {:.1}% ({:.1}/{:.1} GB)",
                sys.memory.percent, sys.memory.used_gb, sys.memory.total_gb
            ));
            out.push(format!(
                "Disk:   {:.1}% ({:.1}/{:.1} GB)",
                sys.disk.percent, sys.disk.used_gb, sys.disk.total_gb
            ));
            out.push(format!("Process RSS: {:.1} MB", sys.process.memory_mb));
        }
        None => out.push("\nSystem metrics unavailable".to_string()),
    }

    if let Some(users) = view.users.as_ref() {
        out.push(format!(
            "Users: {} total, {} active ({} admins, {} teachers, {} students)",
            users.total, users.active, users.admins, users.teachers, users.students
        ));
    }

    if !view.alerts.is_empty() {
        out.push("\nAlerts:".to_string());
        for alert in &view.alerts {
            out.push(format!(
                "{} {}",
                severity_mark(alert.severity),
                alert.message
            ));
        }
    }

    if !view.series.is_empty() {
        out.push(format!(
            "\nHistory ({}/{} samples):",
            view.series.len(),
            view.series.capacity
        ));
        for (channel, title) in SPARK_CHANNELS {
            out.push(format!(
                "{title:<12} {}",
                sparkline(view.series.channel(channel))
            ));
        }
    }

    out.join("\n")
}

fn window_line(title: &str, w: &WindowStats) -> String {
    format!(
        "{title}: {} req, {} err, avg {:.0} ms, p95 {:.0} ms",
        w.requests, w.errors, w.avg_response_ms, w.p95_response_ms
    )
}

fn severity_mark(severity: Severity) -> &'static str {
    match severity {
        Severity::Normal => "[ok]",
        Severity::Warning => "[warn]",
        Severity::Danger => "[DANGER]",
    }
}

fn status_title(status: DashboardStatus) -> &'static str {
    match status {
        DashboardStatus::Loading => "loading",
        DashboardStatus::Ok => "live",
        DashboardStatus::Degraded => "stale (last fetch failed)",
    }
}

fn format_unix(ts: i64) -> String {
    let t = UNIX_EPOCH + Duration::from_secs(ts.max(0) as u64);
    humantime::format_rfc3339_seconds(t).to_string()
}
