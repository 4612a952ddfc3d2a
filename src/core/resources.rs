use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 超过该百分比视为资源紧张
pub const OVERLOAD_PERCENTAGE: f64 = 90.0;

/// 进程所在主机的资源使用快照
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percentage: f64,

    pub disk_path: Option<PathBuf>,
    pub disk_used: u64,
    pub disk_total: u64,
    pub disk_percentage: f64,

    pub file_descriptors_used: u64,
    pub file_descriptors_limit: Option<u64>,
    pub file_descriptors_percentage: f64,

    pub sampled_at: DateTime<Utc>,
}

impl Default for ResourceUsage {
    fn default() -> Self {
        Self {
            memory_used: 0,
            memory_total: 0,
            memory_percentage: 0.0,
            disk_path: None,
            disk_used: 0,
            disk_total: 0,
            disk_percentage: 0.0,
            file_descriptors_used: 0,
            file_descriptors_limit: None,
            file_descriptors_percentage: 0.0,
            sampled_at: Utc::now(),
        }
    }
}

impl ResourceUsage {
    /// 读取当前系统状态；取不到的指标保持为 0
    pub fn sample() -> Self {
        let mut usage = Self::default();

        // 获取系统内存信息（单位 KB）
        if let Ok(mem) = sys_info::mem_info()
            && mem.total > 0
        {
            let available = if mem.avail > 0 { mem.avail } else { mem.free };
            usage.memory_total = mem.total * 1024;
            usage.memory_used = mem.total.saturating_sub(available) * 1024;
            usage.memory_percentage = percentage(usage.memory_used, usage.memory_total);
        }

        // 获取磁盘使用情况
        let disk_path = dirs::data_dir()
            .filter(|p| p.exists())
            .or_else(|| std::env::current_dir().ok());
        if let Some(path) = disk_path {
            usage.sample_disk(&path);
        }

        // 获取文件描述符数量（仅限Unix）
        #[cfg(unix)]
        {
            if let Ok(entries) = std::fs::read_dir("/proc/self/fd") {
                usage.file_descriptors_used = entries.count() as u64;
                if let Ok((soft, _hard)) = rlimit::getrlimit(rlimit::Resource::NOFILE)
                    && soft > 0
                    && soft != rlimit::INFINITY
                {
                    usage.file_descriptors_limit = Some(soft);
                    usage.file_descriptors_percentage =
                        percentage(usage.file_descriptors_used, soft);
                }
            }
        }

        usage.sampled_at = Utc::now();
        usage
    }

    fn sample_disk(&mut self, path: &Path) {
        if let (Ok(total), Ok(available)) = (fs2::total_space(path), fs2::available_space(path)) {
            self.disk_path = Some(path.to_path_buf());
            self.disk_total = total;
            self.disk_used = total.saturating_sub(available);
            self.disk_percentage = percentage(self.disk_used, total);
        }
    }

    /// 超过阈值的资源名称
    pub fn overloaded_resources(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.memory_percentage > OVERLOAD_PERCENTAGE {
            names.push("memory");
        }
        if self.disk_percentage > OVERLOAD_PERCENTAGE {
            names.push("disk");
        }
        if self.file_descriptors_percentage > OVERLOAD_PERCENTAGE {
            names.push("file_descriptors");
        }
        names
    }

    pub fn is_overloaded(&self) -> bool {
        !self.overloaded_resources().is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Memory: {:.1}% used, Disk: {:.1}% used, FDs: {}/{}",
            self.memory_percentage,
            self.disk_percentage,
            self.file_descriptors_used,
            self.file_descriptors_limit
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".into())
        )
    }
}

fn percentage(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}
