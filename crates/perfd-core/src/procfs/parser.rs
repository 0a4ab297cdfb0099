//! Parsers for the `/proc` files the default samplers read.
//!
//! Pure functions over file contents, testable with string inputs.

use std::collections::HashMap;

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// Fields of `/proc/<pid>/stat` or `/proc/<pid>/task/<tid>/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStat {
    pub id: i32,
    pub comm: String,
    pub state: char,
    pub utime: u64,
    pub stime: u64,
    pub num_threads: i32,
}

/// Parses a process or thread `stat` file.
///
/// The comm field can contain spaces and parentheses, so it is delimited by
/// the first '(' and the last ')'.
pub fn parse_task_stat(content: &str) -> Result<TaskStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let id: i32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    if fields.len() < 13 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 13+, got {}",
            fields.len()
        )));
    }

    let parse_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(TaskStat {
        id,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
        num_threads: fields.get(17).and_then(|s| s.parse().ok()).unwrap_or(0),
    })
}

/// Aggregate CPU counters of `/proc/stat`, in clock ticks across all cores.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuTicks {
    pub total: u64,
    /// `idle` plus `iowait`.
    pub idle: u64,
}

impl CpuTicks {
    pub fn busy(&self) -> u64 {
        self.total.saturating_sub(self.idle)
    }
}

/// Parses the aggregate `cpu` line of `/proc/stat`.
pub fn parse_cpu_ticks(content: &str) -> Result<CpuTicks, ParseError> {
    let line = content
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| ParseError::new("missing aggregate cpu line"))?;

    let values = line
        .split_whitespace()
        .skip(1)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| ParseError::new(format!("invalid cpu counter '{}'", value)))
        })
        .collect::<Result<Vec<u64>, ParseError>>()?;
    if values.len() < 4 {
        return Err(ParseError::new("not enough cpu counters"));
    }

    Ok(CpuTicks {
        total: values.iter().sum(),
        idle: values[3] + values.get(4).copied().unwrap_or(0),
    })
}

/// Memory fields of `/proc/<pid>/status`, in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcStatus {
    pub name: String,
    pub vm_size: u64,
    pub vm_rss: u64,
    pub vm_swap: u64,
    pub threads: u32,
}

/// Parses `/proc/<pid>/status` (`key:\tvalue` pairs, one per line).
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ParseError> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for line in content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            fields.insert(key.trim(), value.trim());
        }
    }
    if !fields.contains_key("Name") {
        return Err(ParseError::new("missing Name in status"));
    }

    let parse_kb = |key: &str| -> u64 {
        fields
            .get(key)
            .and_then(|v| v.split_whitespace().next())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    };

    Ok(ProcStatus {
        name: fields.get("Name").unwrap_or(&"").to_string(),
        vm_size: parse_kb("VmSize"),
        vm_rss: parse_kb("VmRSS"),
        vm_swap: parse_kb("VmSwap"),
        threads: fields
            .get("Threads")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0),
    })
}

/// Byte counters summed over every non-loopback interface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetTotals {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Parses `/proc/<pid>/net/dev`, skipping the header lines and `lo`.
pub fn parse_net_dev_totals(content: &str) -> Result<NetTotals, ParseError> {
    let mut totals = NetTotals::default();

    for line in content.lines() {
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }
        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        if interface.trim() == "lo" {
            continue;
        }

        let values: Vec<&str> = counters.split_whitespace().collect();
        if values.len() < 16 {
            return Err(ParseError::new(format!(
                "not enough fields for interface {}",
                interface.trim()
            )));
        }
        let get_val = |idx: usize| -> u64 { values[idx].parse().unwrap_or(0) };
        totals.rx_bytes += get_val(0);
        totals.tx_bytes += get_val(8);
    }

    Ok(totals)
}

/// Counts socket entries of `/proc/<pid>/net/tcp` or `tcp6`.
pub fn count_tcp_connections(content: &str) -> u32 {
    content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .count() as u32
}
