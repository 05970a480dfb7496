use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use log::{error, info, warn};
use rayon::prelude::*;

use crate::VERSION;
use crate::buffer::{Buffer, BufferMatrix};
use crate::error::{Error, Result};
use crate::input::{Split, enumerate};

use super::config::{JobConfig, setup};
use super::context::{CancelToken, WorkerContext};
use super::process::{ProcessRegistry, exec};
use super::stream::{
    stream_from_input, stream_from_shuffle, stream_to_log, stream_to_output, stream_to_shuffle,
};

/// Set by the SIGINT handler, observed by the interrupt watcher thread.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_interrupt(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

/// Run a configured job to completion. On failure the job has been rolled
/// back (children killed, temporary data removed) before the error is
/// returned.
pub fn run(config: JobConfig) -> Result<()> {
    let job = match Job::new(config) {
        Ok(job) => Arc::new(job),
        Err(e) => {
            error!("{}", e);
            return Err(e);
        }
    };

    job.install_interrupt_watcher();
    let result = job.execute();
    job.finished.store(true, Ordering::Relaxed);

    if let Err(e) = &result {
        job.rollback(e);
    }
    result
}

struct Job {
    config: JobConfig,
    memory: usize,
    output: Option<PathBuf>,
    temp_dir: PathBuf,
    temp_scratch: PathBuf,
    temp_spill: PathBuf,
    temp_output: PathBuf,
    cancel: CancelToken,
    registry: Arc<ProcessRegistry>,
    rollback_once: Once,
    finished: Arc<AtomicBool>,
}

impl Job {
    fn new(config: JobConfig) -> Result<Job> {
        let s = setup(&config)?;
        Ok(Job {
            config,
            memory: s.memory,
            output: s.output,
            temp_dir: s.temp_dir,
            temp_scratch: s.temp_scratch,
            temp_spill: s.temp_spill,
            temp_output: s.temp_output,
            cancel: CancelToken::new(),
            registry: Arc::new(ProcessRegistry::new()),
            rollback_once: Once::new(),
            finished: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Catch the first interrupt and attempt a graceful termination
    /// (mainly to deal with ctrl-c). The handler only flips a flag; a
    /// watcher thread does the actual rollback.
    fn install_interrupt_watcher(self: &Arc<Job>) {
        INTERRUPTED.store(false, Ordering::Relaxed);
        #[cfg(unix)]
        unsafe {
            let handler = handle_interrupt as extern "C" fn(libc::c_int);
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        }

        let job = Arc::clone(self);
        thread::spawn(move || {
            while !job.finished.load(Ordering::Relaxed) {
                if INTERRUPTED.load(Ordering::Relaxed) {
                    job.rollback(&Error::Interrupted);
                    process::exit(1);
                }
                thread::sleep(Duration::from_millis(50));
            }
        });
    }

    fn execute(&self) -> Result<()> {
        let start = Instant::now();

        info!("");
        info!("fxrt {}", VERSION);
        info!("");
        self.log_config();
        info!("");
        self.log_plan();
        info!("");

        let splits = if self.config.has_input() {
            Some(enumerate(
                &self.config.input,
                self.config.mappers,
                self.config.split_size,
            )?)
        } else {
            None
        };

        info!("running mapper stage");
        info!("");
        let map_start = Instant::now();
        let inputs = vec![(); self.config.mappers];
        let rows = self.run_workers(inputs, |ctx, ()| self.map_worker(ctx, splits.as_ref()))?;
        let map_duration = map_start.elapsed();
        info!("");

        let mut reduce_duration = Duration::ZERO;
        if self.config.has_reducer() {
            info!("running reducer stage");
            info!("");
            let reduce_start = Instant::now();
            let columns = BufferMatrix::from_rows(rows).into_columns();
            self.run_workers(columns, |ctx, column| self.reduce_worker(ctx, column))?;
            reduce_duration = reduce_start.elapsed();
            info!("");
        }

        info!("finalizing");
        info!("");
        self.commit()?;

        info!("  mappers runtime: {:?}", map_duration);
        if self.config.has_reducer() {
            info!("  reducers runtime: {:?}", reduce_duration);
        }
        info!("  total runtime: {:?}", start.elapsed());
        info!("");
        info!("success");

        if self.output.is_none() {
            self.print_output()?;
        }
        self.cleanup();
        Ok(())
    }

    /// Fan out one stage: `inputs.len()` workers, each given its own
    /// context and input. The first error becomes the stage result and
    /// cancels the stage; siblings observe the token and their children
    /// are killed.
    fn run_workers<I, T, F>(&self, inputs: Vec<I>, f: F) -> Result<Vec<T>>
    where
        I: Send,
        T: Send,
        F: Fn(WorkerContext, I) -> Result<T> + Sync,
    {
        let n = inputs.len();
        thread::scope(|s| {
            let (tx, rx) = mpsc::channel::<(usize, Result<T>)>();
            for (wid, input) in inputs.into_iter().enumerate() {
                let tx = tx.clone();
                let f = &f;
                let ctx = self.context(wid);
                s.spawn(move || {
                    let _ = tx.send((wid, f(ctx, input)));
                });
            }
            drop(tx);

            let mut results: Vec<Option<T>> = (0..n).map(|_| None).collect();
            let mut first_err: Option<Error> = None;
            for (wid, result) in rx {
                match result {
                    Ok(v) => results[wid] = Some(v),
                    Err(e) => {
                        if first_err.is_none() {
                            self.cancel.cancel();
                            self.registry.kill_all();
                            first_err = Some(e);
                        }
                    }
                }
            }

            match first_err {
                Some(e) => Err(e),
                None => Ok(results.into_iter().flatten().collect()),
            }
        })
    }

    fn context(&self, worker_id: usize) -> WorkerContext {
        WorkerContext {
            worker_id,
            mappers: self.config.mappers,
            reducers: self.config.reducers,
            scratch: self.temp_scratch.clone(),
            cancel: self.cancel.clone(),
            registry: Arc::clone(&self.registry),
        }
    }

    /// Map-stage worker: build the buffer row for this mapper, run the
    /// mapper command over the shared splits, then sort (and merge spills)
    /// when the map side owns sorting.
    fn map_worker(
        &self,
        ctx: WorkerContext,
        splits: Option<&Receiver<Result<Split>>>,
    ) -> Result<Vec<Buffer>> {
        ctx.log("mapper starting");

        let mut row: Vec<Buffer> = if self.config.has_reducer() {
            let capacity = self.memory / (self.config.mappers * self.config.reducers);
            (0..self.config.reducers)
                .map(|j| {
                    let dir = self
                        .temp_spill
                        .join(ctx.worker_id.to_string())
                        .join(j.to_string());
                    Buffer::new(capacity, dir)
                })
                .collect()
        } else {
            Vec::new()
        };

        exec(
            &ctx,
            &self.config.mapper,
            |w| match splits {
                Some(rx) => stream_from_input(&ctx, w, rx),
                None => Ok(()),
            },
            |r| {
                if self.config.has_reducer() {
                    stream_to_shuffle(&ctx, r, &mut row)
                } else {
                    stream_to_output(&ctx, r, &self.temp_output)
                }
            },
            |r| stream_to_log(&ctx, r),
        )?;

        // Sorting is placed on whichever side has more workers; ties go to
        // the mappers.
        if self.config.has_reducer() && self.config.reducers <= self.config.mappers {
            ctx.log("sorting");
            self.finish_buffers(&ctx, &mut row)?;
        }

        ctx.log("done");
        Ok(row)
    }

    /// Reduce-stage worker: sort its column when the reduce side owns
    /// sorting, then run the reducer command over the merged record
    /// stream.
    fn reduce_worker(&self, ctx: WorkerContext, mut column: Vec<Buffer>) -> Result<()> {
        ctx.log("reducer starting");

        if self.config.reducers > self.config.mappers {
            ctx.log("sorting");
            self.finish_buffers(&ctx, &mut column)?;
        }

        let records: u64 = column.iter().map(|b| b.records()).sum();
        ctx.log(&format!("processing {} records", records));

        exec(
            &ctx,
            &self.config.reducer,
            |w| stream_from_shuffle(&ctx, w, &column),
            |r| stream_to_output(&ctx, r, &self.temp_output),
            |r| stream_to_log(&ctx, r),
        )?;

        ctx.log("done");
        Ok(())
    }

    /// Sort every buffer and reduce its spills to at most one file. The
    /// buffers of one worker are independent, so they are finished in
    /// parallel.
    fn finish_buffers(&self, ctx: &WorkerContext, buffers: &mut [Buffer]) -> Result<()> {
        let ways = self.config.mappers.max(16);
        buffers.par_iter_mut().enumerate().try_for_each(|(i, b)| {
            b.sort();
            if b.need_external_merge() {
                ctx.log(&format!("merging {} spill files for buffer {}", b.spills(), i));
                b.external_merge(ways)?;
            }
            Ok(())
        })
    }

    /// Publish the staged output by renaming it to the target directory.
    /// On rename failure the temporary directory is deliberately kept so
    /// the staged data can be salvaged.
    fn commit(&self) -> Result<()> {
        if let Some(output) = &self.output {
            if let Err(e) = fs::rename(&self.temp_output, output) {
                error!(
                    "  error while moving output data from {} to {} - {}",
                    self.temp_output.display(),
                    output.display(),
                    e
                );
                error!(
                    "  temporary data directory {} was not removed",
                    self.temp_dir.display()
                );
                info!("failed");
                self.rollback_once.call_once(|| {});
                return Err(Error::Io(e));
            }
        }
        Ok(())
    }

    /// Copy the staged part files to stdout, in worker order. Used by jobs
    /// without an output directory.
    fn print_output(&self) -> Result<()> {
        let workers = if self.config.has_reducer() {
            self.config.reducers
        } else {
            self.config.mappers
        };

        let stdout = io::stdout();
        let mut w = BufWriter::new(stdout.lock());
        for wid in 0..workers {
            let path = self.temp_output.join(format!("part-{}", wid));
            match File::open(&path) {
                Ok(f) => {
                    io::copy(&mut BufReader::new(f), &mut w)?;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Graceful termination of a failed job: kill any running commands,
    /// ensure no more are spawned, and remove temporary data. Runs at most
    /// once however many workers fail.
    fn rollback(&self, err: &Error) {
        self.rollback_once.call_once(|| {
            info!("");
            info!("error - attempting rollback");
            info!("");
            error!("{}", err);
            self.cancel.cancel();
            self.registry.kill_all();
            self.cleanup();
            info!("failed");
        });
    }

    fn cleanup(&self) {
        if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
            warn!(
                "failed to remove temporary data directory {} - {}",
                self.temp_dir.display(),
                e
            );
        }
    }

    fn log_config(&self) {
        info!("configuration:");
        info!("");
        if self.config.has_input() {
            info!("  input:    {}", self.config.input);
        } else {
            info!("  input:    (none)");
        }
        info!("  mapper:   {}", self.config.mapper);
        info!("  mappers:  {}", self.config.mappers);
        if self.config.has_reducer() {
            info!("  reducer:  {}", self.config.reducer);
            info!("  reducers: {}", self.config.reducers);
        } else {
            info!("  reducer:  (none)");
            info!("  reducers: (none)");
        }
        if let Some(output) = &self.output {
            info!("  output:   {}", output.display());
        } else {
            info!("  output:   (none)");
        }
        info!("  memory:   {}", self.config.memory);
        info!("  tempdir:  {}", self.temp_dir.display());
    }

    fn log_plan(&self) {
        info!("plan:");
        info!("");
        let mut indent = String::from("  ");
        if let Some(output) = &self.output {
            info!("{}->  output ({})", indent, output.display());
            indent.push_str("  ");
        }
        if self.config.has_reducer() {
            info!("{}->  reduce ({})", indent, self.config.reducer);
            indent.push_str("  ");
            info!("{}->  shuffle and sort", indent);
            indent.push_str("  ");
        }
        info!("{}->  map ({})", indent, self.config.mapper);
        if self.config.has_input() {
            info!("{}  ->  input ({})", indent, self.config.input);
        }
    }
}
