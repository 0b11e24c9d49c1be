use std::{
    collections::HashMap,
    future::Future,
    path::{Path, PathBuf},
    process::ExitStatus,
    time::Duration,
};

use chrono::Local;
use futures::future::join_all;
use tokio::process::Child;

use crate::{
    api::{ApiError, ChannelLookup, ChannelSource, LiveInfo},
    config::Config,
    ffmpeg,
    lock::{self, LockRegistry},
    stats::RecordingStats,
    streamlink::{self, StreamlinkError},
    template::{self, TemplateError, TemplateVars},
    util,
};

/// How long streamlink gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    #[error("{0} invalid channel id(s) found")]
    InvalidChannels(usize),
    #[error("could not render output path: {0}")]
    TemplateError(#[from] TemplateError),
    #[error("streamlink error: {0}")]
    StreamlinkError(#[from] StreamlinkError),
    #[error("API error: {0}")]
    ApiError(#[from] ApiError),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

pub struct Recorder<S> {
    config: Config,
    source: S,
    locks: LockRegistry,
    channel_names: HashMap<String, String>,
}

impl<S: ChannelSource> Recorder<S> {
    pub fn new(config: Config, source: S) -> Self {
        Self {
            config,
            source,
            locks: LockRegistry::new(),
            channel_names: HashMap::new(),
        }
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Display name of a channel, falling back to its id.
    pub fn channel_name<'a>(&'a self, channel_id: &'a str) -> &'a str {
        self.channel_names
            .get(channel_id)
            .map(String::as_str)
            .unwrap_or(channel_id)
    }

    /// Records until Ctrl-C or SIGTERM.
    pub async fn run(&mut self) -> Result<(), RecorderError> {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), RecorderError>
    where
        F: Future<Output = ()>,
    {
        info!("Starting Chzzk recorder");

        lock::cleanup_stale(&template::base_dir(&self.config.output.path));

        let result = self.run_monitors(shutdown).await;
        self.locks.release_all();

        result
    }

    async fn run_monitors<F>(&mut self, shutdown: F) -> Result<(), RecorderError>
    where
        F: Future<Output = ()>,
    {
        self.validate_channels().await?;

        let this = &*self;
        let monitors = join_all(
            this.config
                .channels
                .iter()
                .map(|channel_id| this.monitor_channel(channel_id)),
        );

        tokio::select! {
            _ = monitors => {}
            _ = shutdown => info!("Shutdown requested, stopping recordings"),
        }

        Ok(())
    }

    /// Resolves every configured channel and fails if any does not exist.
    pub async fn validate_channels(&mut self) -> Result<(), RecorderError> {
        debug!("Validating channels...");
        let mut invalid = Vec::new();

        for channel_id in &self.config.channels {
            match self.source.channel(channel_id).await {
                Ok(ChannelLookup::Found(channel)) => {
                    debug!("{} ({}) validated", channel.channel_name, channel_id);
                    self.channel_names
                        .insert(channel_id.clone(), channel.channel_name);
                }
                Ok(ChannelLookup::NotFound) => invalid.push(channel_id.as_str()),
                Ok(ChannelLookup::Unavailable(status)) => {
                    warn!("[{}] API responded with HTTP {}", channel_id, status);
                }
                Err(e) => {
                    error!("[{}] Validation failed: {}", channel_id, e);
                    invalid.push(channel_id.as_str());
                }
            }
        }

        if !invalid.is_empty() {
            error!("Invalid channel id(s): {}", invalid.join(", "));
            return Err(RecorderError::InvalidChannels(invalid.len()));
        }

        let names = self
            .config
            .channels
            .iter()
            .map(|id| self.channel_name(id))
            .collect::<Vec<_>>();
        info!("Monitoring channels ({}): [{}]", names.len(), names.join(", "));

        Ok(())
    }

    /// Polls one channel forever, recording whenever it goes live.
    pub async fn monitor_channel(&self, channel_id: &str) {
        let interval = self.config.monitoring.check_interval();
        info!("[{}] Monitoring started", self.channel_name(channel_id));

        loop {
            let name = self.channel_name(channel_id);

            match self.source.live_detail(channel_id).await {
                Ok(Some(live)) => {
                    debug!("[{}] Live status: {:?}", name, live.status);
                    if live.is_open() {
                        if let Err(e) = self.start_recording(channel_id, &live).await {
                            error!("[{}] Recording error: {}", name, e);
                        }
                    }
                }
                Ok(None) => debug!("[{}] No live info", name),
                Err(e) => warn!("[{}] Could not check live status: {}", name, e),
            }

            tokio::time::sleep(interval).await;
        }
    }

    async fn prepare_output_path(
        &self,
        vars: &TemplateVars<'_>,
    ) -> Result<(PathBuf, String), RecorderError> {
        let dir = util::expand_home(&template::render(&self.config.output.path, vars)?);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = template::render(&self.config.output.filename, vars)?;

        Ok((dir, file_name))
    }

    /// Records one broadcast from start to finish. Returns once streamlink
    /// has exited and the file has been post-processed.
    pub async fn start_recording(
        &self,
        channel_id: &str,
        live: &LiveInfo,
    ) -> Result<(), RecorderError> {
        let name = match live.channel_name.as_str() {
            "Unknown" => self.channel_name(channel_id),
            live_name => live_name,
        };
        let vars = TemplateVars {
            author: name,
            title: &live.live_title,
            time: live.open_date.unwrap_or_else(|| Local::now().naive_local()),
        };

        let (dir, file_name) = self.prepare_output_path(&vars).await?;

        let lock_path = dir.join(format!("{}.lock", file_name));
        let Some(_lock) = self.locks.acquire(&lock_path)? else {
            info!("[{}] Skipping: this broadcast is already being recorded", name);
            return Ok(());
        };
        info!("[{}] Stream started: {}", name, live.live_title);

        let temp_path = dir.join(format!("temp_{}", file_name));

        // An interrupted earlier run of this broadcast left its capture behind.
        if temp_path.exists() {
            let salvaged = util::unique_path(dir.join(&file_name));
            warn!(
                "[{}] Saving leftover capture {} as {}",
                name,
                temp_path.display(),
                salvaged.display()
            );
            self.fix_timestamps(&temp_path, &salvaged, name).await?;
        }
        let final_path = util::unique_path(dir.join(&file_name));

        let args = streamlink::build_args(
            channel_id,
            &temp_path,
            &self.config.output.quality,
            &self.config.cookies,
        );

        info!("[{}] Recording to {}", name, final_path.display());
        let stats = RecordingStats::new();
        let mut child = streamlink::spawn(&self.config.binaries.streamlink, &args)?;
        let output = streamlink::forward_output(&mut child, name);

        let status = self
            .wait_for_stream_end(channel_id, live.live_id, &mut child, name)
            .await?;
        if let Err(e) = output.await {
            debug!("[{}] streamlink output task failed: {}", name, e);
        }

        if !status.success() {
            error!("[{}] streamlink exited with {}", name, status);
        }
        info!("[{}] Recording finished", name);

        if temp_path.exists() {
            self.fix_timestamps(&temp_path, &final_path, name).await?;
            info!(
                "[{}] Saved {} ({})",
                name,
                final_path.display(),
                stats.summary(&final_path)
            );
        }

        Ok(())
    }

    /// Waits while the broadcast `live_id` stays open, then stops the
    /// child. Returns early if the child exits by itself.
    pub async fn wait_for_stream_end(
        &self,
        channel_id: &str,
        live_id: Option<i64>,
        child: &mut Child,
        name: &str,
    ) -> std::io::Result<ExitStatus> {
        let interval = self.config.monitoring.stop_check_interval();

        loop {
            tokio::select! {
                status = child.wait() => {
                    debug!("[{}] streamlink process exited", name);
                    return status;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            match self.source.live_detail(channel_id).await {
                Ok(Some(live)) if live.is_open() && live.live_id == live_id => (),
                Ok(_) => {
                    info!("[{}] Stream ended", name);
                    return streamlink::terminate(child, TERMINATE_GRACE).await;
                }
                Err(e) => warn!("[{}] Could not check live status: {}", name, e),
            }
        }
    }

    /// Remuxes `temp` into `output`. If ffmpeg fails the raw capture is
    /// kept under the final name.
    pub async fn fix_timestamps(
        &self,
        temp: &Path,
        output: &Path,
        name: &str,
    ) -> std::io::Result<()> {
        info!("[{}] Resetting timestamps...", name);

        match ffmpeg::reset_timestamps(&self.config.binaries.ffmpeg, temp, output).await {
            Ok(()) => {
                info!("[{}] Post-processing finished: {}", name, output.display());
                tokio::fs::remove_file(temp).await
            }
            Err(e) => {
                error!("[{}] Post-processing failed, keeping original capture: {}", name, e);
                tokio::fs::rename(temp, output).await
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Could not listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        ffi::OsString,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use chrono::NaiveDate;

    use super::*;
    use crate::{
        api::{Channel, LiveStatus},
        config::{BinariesConfig, Cookies, LoggingConfig, MonitoringConfig, OutputConfig},
    };

    const ID_A: &str = "0123456789abcdef0123456789abcdef";
    const ID_B: &str = "fedcba9876543210fedcba9876543210";

    #[derive(Default)]
    struct MockSource {
        channels: HashMap<String, ChannelLookup>,
        lives: Mutex<VecDeque<Option<Option<LiveInfo>>>>,
        live_calls: AtomicUsize,
    }

    impl MockSource {
        fn with_channel(mut self, id: &str, lookup: ChannelLookup) -> Self {
            self.channels.insert(id.into(), lookup);
            self
        }

        /// `None` entries answer with a request error.
        fn with_lives(self, lives: Vec<Option<Option<LiveInfo>>>) -> Self {
            *self.lives.lock().unwrap() = lives.into();
            self
        }
    }

    #[async_trait]
    impl ChannelSource for MockSource {
        async fn channel(&self, channel_id: &str) -> Result<ChannelLookup, ApiError> {
            match self.channels.get(channel_id) {
                Some(lookup) => Ok(lookup.clone()),
                None => Err(request_error()),
            }
        }

        async fn live_detail(&self, _channel_id: &str) -> Result<Option<LiveInfo>, ApiError> {
            self.live_calls.fetch_add(1, Ordering::SeqCst);
            match self.lives.lock().unwrap().pop_front() {
                Some(Some(live)) => Ok(live),
                Some(None) => Err(request_error()),
                None => Ok(Some(live(LiveStatus::Close, 1))),
            }
        }
    }

    fn request_error() -> ApiError {
        util::ClientError::UrlError("mock".into(), "unreachable".into()).into()
    }

    fn live(status: LiveStatus, live_id: i64) -> LiveInfo {
        LiveInfo {
            status,
            live_title: "테스트 방송".into(),
            channel_name: "테스트채널".into(),
            live_id: Some(live_id),
            open_date: NaiveDate::from_ymd_opt(2026, 1, 5)
                .unwrap()
                .and_hms_opt(20, 1, 25),
        }
    }

    fn config(dir: &Path, streamlink: &str, ffmpeg: &str) -> Config {
        Config {
            cookies: Cookies {
                nid_aut: "aut".into(),
                nid_ses: "ses".into(),
            },
            channels: vec![ID_A.into()],
            output: OutputConfig {
                path: format!("{}/{{author}}", dir.display()),
                filename: "[{time:%Y%m%d}] {title}.ts".into(),
                quality: "best".into(),
            },
            monitoring: MonitoringConfig {
                check_interval: 1,
                stop_check_interval: 1,
            },
            logging: LoggingConfig::default(),
            binaries: BinariesConfig {
                streamlink: streamlink.into(),
                ffmpeg: ffmpeg.into(),
            },
        }
    }

    fn found(name: &str) -> ChannelLookup {
        ChannelLookup::Found(Channel {
            channel_id: ID_A.into(),
            channel_name: name.into(),
        })
    }

    #[tokio::test]
    async fn validate_resolves_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "true", "true");
        config.channels.push(ID_B.into());

        let source = MockSource::default()
            .with_channel(ID_A, found("채널A"))
            .with_channel(ID_B, ChannelLookup::Unavailable(503));
        let mut recorder = Recorder::new(config, source);

        recorder.validate_channels().await.expect("channels are valid");
        assert_eq!(recorder.channel_name(ID_A), "채널A");
        assert_eq!(recorder.channel_name(ID_B), ID_B);
    }

    #[tokio::test]
    async fn validate_rejects_unknown_channels() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), "true", "true");
        config.channels.push(ID_B.into());

        // ID_B is missing from the mock, so the lookup errors
        let source = MockSource::default().with_channel(ID_A, ChannelLookup::NotFound);
        let mut recorder = Recorder::new(config, source);

        let err = recorder.validate_channels().await.unwrap_err();
        assert!(matches!(err, RecorderError::InvalidChannels(2)), "{:?}", err);
    }

    #[tokio::test]
    async fn run_fails_on_invalid_channels_and_sweeps_locks() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("old.ts.lock");
        std::fs::write(&stale, b"").unwrap();

        let source = MockSource::default().with_channel(ID_A, ChannelLookup::NotFound);
        let mut recorder = Recorder::new(config(dir.path(), "true", "true"), source);

        let result = recorder.run_until(futures::future::pending()).await;
        assert!(matches!(result, Err(RecorderError::InvalidChannels(1))));
        assert!(!stale.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_records_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default()
            .with_channel(ID_A, found("채널A"))
            .with_lives(vec![Some(Some(live(LiveStatus::Open, 7)))]);
        let mut recorder = Recorder::new(config(dir.path(), "true", "true"), source);

        recorder
            .run_until(tokio::time::sleep(Duration::from_millis(1500)))
            .await
            .expect("clean shutdown");

        assert!(recorder.source.live_calls.load(Ordering::SeqCst) >= 2);
        assert!(recorder.locks().is_empty());
        assert!(dir.path().join("테스트채널").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recording_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(config(dir.path(), "true", "true"), MockSource::default());

        recorder
            .start_recording(ID_A, &live(LiveStatus::Open, 1))
            .await
            .expect("recording succeeds");

        let out = dir.path().join("테스트채널");
        assert!(!out.join("[20260105] 테스트 방송.ts.lock").exists());
        assert!(recorder.locks().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn leftover_capture_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(config(dir.path(), "true", "false"), MockSource::default());

        let out = dir.path().join("테스트채널");
        std::fs::create_dir_all(&out).unwrap();
        let leftover = vec![0x47u8; 4096];
        std::fs::write(out.join("temp_[20260105] 테스트 방송.ts"), &leftover).unwrap();

        recorder
            .start_recording(ID_A, &live(LiveStatus::Open, 1))
            .await
            .expect("recording succeeds");

        assert!(!out.join("temp_[20260105] 테스트 방송.ts").exists());
        assert_eq!(
            std::fs::read(out.join("[20260105] 테스트 방송.ts")).unwrap(),
            leftover
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unknown_channel_name_uses_validated_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default().with_channel(ID_A, found("채널A"));
        let mut recorder = Recorder::new(config(dir.path(), "true", "true"), source);
        recorder.validate_channels().await.expect("channels are valid");

        let mut info = live(LiveStatus::Open, 1);
        info.channel_name = "Unknown".into();
        recorder
            .start_recording(ID_A, &info)
            .await
            .expect("recording succeeds");

        assert!(dir.path().join("채널A").is_dir());
        assert!(!dir.path().join("Unknown").exists());
    }

    #[tokio::test]
    async fn held_lock_skips_recording() {
        let dir = tempfile::tempdir().unwrap();
        // spawning this would fail, so reaching Ok proves it was skipped
        let recorder = Recorder::new(
            config(dir.path(), "/nonexistent/streamlink", "true"),
            MockSource::default(),
        );

        let out = dir.path().join("테스트채널");
        std::fs::create_dir_all(&out).unwrap();
        let lock = out.join("[20260105] 테스트 방송.ts.lock");
        std::fs::write(&lock, b"").unwrap();

        recorder
            .start_recording(ID_A, &live(LiveStatus::Open, 1))
            .await
            .expect("skipped");
        assert!(lock.exists());
    }

    #[tokio::test]
    async fn missing_streamlink_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(
            config(dir.path(), "/nonexistent/streamlink", "true"),
            MockSource::default(),
        );

        let err = recorder
            .start_recording(ID_A, &live(LiveStatus::Open, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::StreamlinkError(_)), "{:?}", err);
        assert!(recorder.locks().is_empty());
    }

    #[cfg(unix)]
    async fn wait_with(
        lives: Vec<Option<Option<LiveInfo>>>,
        sleep_secs: &str,
    ) -> (ExitStatus, usize) {
        let dir = tempfile::tempdir().unwrap();
        let source = MockSource::default().with_lives(lives);
        let recorder = Recorder::new(config(dir.path(), "true", "true"), source);

        let mut child =
            streamlink::spawn(Path::new("sleep"), &[OsString::from(sleep_secs)]).unwrap();
        let status = tokio::time::timeout(
            Duration::from_secs(20),
            recorder.wait_for_stream_end(ID_A, Some(1), &mut child, "test"),
        )
        .await
        .expect("wait finished")
        .expect("child status");

        (status, recorder.source.live_calls.load(Ordering::SeqCst))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stream_end_terminates_child() {
        let (status, calls) = wait_with(vec![Some(Some(live(LiveStatus::Close, 1)))], "30").await;
        assert!(!status.success());
        assert_eq!(calls, 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn new_broadcast_terminates_child() {
        let lives = vec![
            Some(Some(live(LiveStatus::Open, 1))),
            Some(Some(live(LiveStatus::Open, 2))),
        ];
        let (status, calls) = wait_with(lives, "30").await;
        assert!(!status.success());
        assert_eq!(calls, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_live_info_terminates_child() {
        let (status, _) = wait_with(vec![Some(None)], "30").await;
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn request_errors_keep_recording() {
        let lives = vec![None, None, None, None, None, None];
        let (status, calls) = wait_with(lives, "2").await;
        assert!(status.success(), "child ran to completion");
        assert!(calls <= 2, "{}", calls);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timestamps_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(config(dir.path(), "true", "true"), MockSource::default());
        let (temp, out) = (dir.path().join("temp_a.ts"), dir.path().join("a.ts"));
        std::fs::write(&temp, b"data").unwrap();

        recorder.fix_timestamps(&temp, &out, "test").await.unwrap();
        assert!(!temp.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_remux_keeps_capture() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(config(dir.path(), "true", "false"), MockSource::default());
        let (temp, out) = (dir.path().join("temp_a.ts"), dir.path().join("a.ts"));
        std::fs::write(&temp, b"data").unwrap();

        recorder.fix_timestamps(&temp, &out, "test").await.unwrap();
        assert!(!temp.exists());
        assert_eq!(std::fs::read(&out).unwrap(), b"data");
    }
}
