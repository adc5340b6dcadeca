//! # 后台拟合工作线程
//!
//! 把 `Session::fit_all_with` 放到独立线程执行，结果以 `FitEvent` 消息回传，
//! 显示层只需轮询 `try_recv`，数值计算不会阻塞界面。
//!
//! 会话以所有权转移的方式交给工作线程，完成后随 `FitEvent::Completed` 交还，
//! 不存在两个线程同时持有同一会话的情况。同一时刻只允许一个任务运行。
//!
//! ## 依赖关系
//! - 被 `commands/fit.rs` 使用
//! - 使用 `session::Session`

use super::{FitSummary, Session};
use crate::deconv::GroupOutcome;
use crate::error::{PeakfitError, Result};
use crate::models::FitResult;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 工作线程回传的事件
#[derive(Debug)]
pub enum FitEvent {
    /// 单峰拟合完成
    PeakFitted(FitResult),
    /// 峰级失败
    PeakFailed {
        peak_index: usize,
        position: f64,
        reason: String,
    },
    /// 一个峰组处理完成
    GroupFinished {
        index: usize,
        total: usize,
        outcome: GroupOutcome,
    },
    /// 附加诊断信息
    Diagnostic(String),
    /// 整个任务失败（如没有谱或没有峰）
    JobFailed(String),
    /// 任务结束，交还会话与汇总
    Completed {
        session: Box<Session>,
        summary: Option<FitSummary>,
    },
}

enum Job {
    Fit(Box<Session>),
    Shutdown,
}

/// 提交被拒绝时原样交还会话
#[derive(Debug)]
pub struct Rejected {
    pub session: Box<Session>,
    pub error: PeakfitError,
}

/// 后台拟合工作线程
pub struct FitWorker {
    jobs: Sender<Job>,
    events: Receiver<FitEvent>,
    busy: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FitWorker {
    /// 启动工作线程
    pub fn spawn() -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let (event_tx, event_rx) = mpsc::channel::<FitEvent>();
        let busy = Arc::new(AtomicBool::new(false));
        let busy_flag = Arc::clone(&busy);

        let handle = thread::Builder::new()
            .name("peakfit-worker".to_string())
            .spawn(move || worker_loop(job_rx, event_tx, busy_flag))
            .map_err(|e| PeakfitError::Other(format!("failed to start worker thread: {}", e)))?;

        Ok(Self {
            jobs: job_tx,
            events: event_rx,
            busy,
            handle: Some(handle),
        })
    }

    /// 提交一次全谱拟合；已有任务运行时拒绝并交还会话
    pub fn submit(&self, session: Box<Session>) -> std::result::Result<(), Rejected> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Rejected {
                session,
                error: PeakfitError::WorkerBusy,
            });
        }

        match self.jobs.send(Job::Fit(session)) {
            Ok(()) => Ok(()),
            Err(mpsc::SendError(job)) => {
                self.busy.store(false, Ordering::Release);
                match job {
                    Job::Fit(session) => Err(Rejected {
                        session,
                        error: PeakfitError::WorkerDisconnected,
                    }),
                    Job::Shutdown => Ok(()),
                }
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// 非阻塞地取一个事件
    pub fn try_recv(&self) -> Result<Option<FitEvent>> {
        match self.events.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(PeakfitError::WorkerDisconnected),
        }
    }

    /// 阻塞等待下一个事件
    pub fn recv(&self) -> Result<FitEvent> {
        self.events
            .recv()
            .map_err(|_| PeakfitError::WorkerDisconnected)
    }
}

impl Drop for FitWorker {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(jobs: Receiver<Job>, events: Sender<FitEvent>, busy: Arc<AtomicBool>) {
    while let Ok(job) = jobs.recv() {
        let mut session = match job {
            Job::Fit(session) => session,
            Job::Shutdown => break,
        };

        let outcome = session.fit_all_with(|index, total, group| {
            for result in &group.results {
                let _ = events.send(FitEvent::PeakFitted(result.clone()));
            }
            for failure in &group.failures {
                let _ = events.send(FitEvent::PeakFailed {
                    peak_index: failure.peak_index,
                    position: failure.position,
                    reason: failure.error.to_string(),
                });
            }
            for line in &group.diagnostics {
                let _ = events.send(FitEvent::Diagnostic(line.clone()));
            }
            let _ = events.send(FitEvent::GroupFinished {
                index,
                total,
                outcome: group.outcome.clone(),
            });
        });

        let summary = match outcome {
            Ok(summary) => Some(summary),
            Err(e) => {
                log::warn!("fit job failed: {}", e);
                let _ = events.send(FitEvent::JobFailed(e.to_string()));
                None
            }
        };

        busy.store(false, Ordering::Release);
        if events.send(FitEvent::Completed { session, summary }).is_err() {
            break;
        }
    }
    log::debug!("fit worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deconv::testutil::{grid, pv_trace};
    use crate::models::{FitConfig, Spectrum};

    fn loaded_session() -> Box<Session> {
        let x = grid(5.0, 15.0, 0.01);
        let y = pv_trace(&x, &[(8.0, 0.2, 400.0), (12.0, 0.25, 300.0)], 50.0, 0.5);
        let mut session = Session::new(FitConfig::default());
        session.set_spectrum(Spectrum::new("worker", x, y).unwrap());
        session.detect_peaks().unwrap();
        Box::new(session)
    }

    fn drain(worker: &FitWorker) -> (Vec<FitEvent>, Box<Session>, Option<FitSummary>) {
        let mut seen = Vec::new();
        loop {
            match worker.recv().unwrap() {
                FitEvent::Completed { session, summary } => return (seen, session, summary),
                other => seen.push(other),
            }
        }
    }

    #[test]
    fn test_worker_streams_results_and_returns_session() {
        let worker = FitWorker::spawn().unwrap();
        worker.submit(loaded_session()).unwrap();

        let (events, session, summary) = drain(&worker);
        let fitted = events
            .iter()
            .filter(|e| matches!(e, FitEvent::PeakFitted(_)))
            .count();
        let finished = events
            .iter()
            .filter(|e| matches!(e, FitEvent::GroupFinished { .. }))
            .count();
        assert_eq!(fitted, 2);
        assert_eq!(finished, 2);
        assert_eq!(summary.unwrap().fitted_peaks, 2);
        assert_eq!(session.results().len(), 2);
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_second_submit_is_rejected_while_busy() {
        let worker = FitWorker::spawn().unwrap();
        worker.busy.store(true, Ordering::Release);

        match worker.submit(loaded_session()) {
            Err(Rejected {
                session,
                error: PeakfitError::WorkerBusy,
            }) => assert_eq!(session.candidates().len(), 2),
            other => panic!("expected WorkerBusy rejection, got {:?}", other.err().map(|r| r.error)),
        }
        assert!(worker.try_recv().unwrap().is_none());

        worker.busy.store(false, Ordering::Release);
        worker.submit(loaded_session()).unwrap();
        let (_, session, summary) = drain(&worker);
        assert_eq!(summary.unwrap().fitted_peaks, 2);
        assert_eq!(session.results().len(), 2);
    }

    #[test]
    fn test_polling_until_completed() {
        let worker = FitWorker::spawn().unwrap();
        assert!(worker.try_recv().unwrap().is_none());
        worker.submit(loaded_session()).unwrap();

        let session = loop {
            match worker.try_recv().unwrap() {
                Some(FitEvent::Completed { session, .. }) => break session,
                Some(_) => {}
                None => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        };
        assert_eq!(session.fits().len(), 2);
    }

    #[test]
    fn test_job_without_spectrum_reports_failure() {
        let worker = FitWorker::spawn().unwrap();
        worker
            .submit(Box::new(Session::new(FitConfig::default())))
            .unwrap();

        let (events, _, summary) = drain(&worker);
        assert!(summary.is_none());
        assert!(events.iter().any(|e| matches!(e, FitEvent::JobFailed(_))));
    }
}
