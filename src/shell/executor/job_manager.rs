use std::fmt;

use log::debug;
use nix::unistd::Pid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done,
}

/// 一条后台管道
#[derive(Debug, Clone)]
pub struct Job {
    pub index: usize,
    pub pids: Vec<Pid>,
    pub command: String,
    pub status: JobStatus,
    remaining: Vec<Pid>,
}

impl Job {
    fn new(index: usize, pids: Vec<Pid>, command: String) -> Self {
        Self {
            index,
            remaining: pids.clone(),
            pids,
            command,
            status: JobStatus::Running,
        }
    }

    /// 最后一个阶段的 pid，也就是提示给用户的那个
    pub fn pid(&self) -> Option<Pid> {
        self.pids.last().copied()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            JobStatus::Running => "running",
            JobStatus::Done => "done",
        };
        let pid = self.pid().map(|pid| pid.as_raw()).unwrap_or_default();
        write!(f, "[{}] {} {} {}", self.index, pid, status, self.command)
    }
}

/// 后台任务表，只在 shell 主循环里读写
#[derive(Debug, Default)]
pub struct JobManager {
    jobs: Vec<Job>,
}

impl JobManager {
    pub fn new() -> Self {
        Self { jobs: Vec::new() }
    }

    pub fn get_jobs(&self) -> &[Job] {
        &self.jobs
    }

    fn find_available_index(&self) -> usize {
        let mut index = 1;
        while self.jobs.iter().any(|job| job.index == index) {
            index += 1;
        }
        index
    }

    pub fn add_job(&mut self, pids: Vec<Pid>, command: String) -> usize {
        let index = self.find_available_index();
        debug!("后台任务 [{}] {:?}: {}", index, pids, command);
        self.jobs.push(Job::new(index, pids, command));
        index
    }

    /// 处理已回收的 pid，返回全部阶段都已结束的任务
    pub fn mark_reaped(&mut self, reaped: &[Pid]) -> Vec<Job> {
        for job in self.jobs.iter_mut() {
            job.remaining.retain(|pid| !reaped.contains(pid));
            if job.remaining.is_empty() {
                job.status = JobStatus::Done;
            }
        }

        let (finished, running): (Vec<Job>, Vec<Job>) = self
            .jobs
            .drain(..)
            .partition(|job| job.status == JobStatus::Done);
        self.jobs = running;
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pids(raw: &[i32]) -> Vec<Pid> {
        raw.iter().copied().map(Pid::from_raw).collect()
    }

    #[test]
    fn test_indexes_are_reused() {
        let mut jobs = JobManager::new();
        assert_eq!(jobs.add_job(pids(&[10]), "sleep 1".into()), 1);
        assert_eq!(jobs.add_job(pids(&[20]), "sleep 2".into()), 2);
        let done = jobs.mark_reaped(&pids(&[10]));
        assert_eq!(done.len(), 1);
        assert_eq!(jobs.add_job(pids(&[30]), "sleep 3".into()), 1);
    }

    #[test]
    fn test_job_finishes_after_all_stages() {
        let mut jobs = JobManager::new();
        jobs.add_job(pids(&[11, 12]), "yes | head".into());
        assert!(jobs.mark_reaped(&pids(&[11])).is_empty());
        assert_eq!(jobs.get_jobs()[0].status, JobStatus::Running);

        let done = jobs.mark_reaped(&pids(&[12, 99]));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].to_string(), "[1] 12 done yes | head");
        assert!(jobs.get_jobs().is_empty());
    }
}
