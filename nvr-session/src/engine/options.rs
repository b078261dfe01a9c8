//! Engine option sets.
//!
//! Transport behaviour (RTSP over TCP, caching, timeouts, transport-level
//! reconnect) is configured once here and handed to the engine with every
//! media. Transport-level reconnect is independent of the session-level
//! reconnect policy; both are bounded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-media transport and decoding options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Interleave RTSP over TCP instead of UDP.
    pub rtsp_tcp: bool,
    /// Network caching in milliseconds.
    pub network_caching_ms: u32,
    /// Live caching in milliseconds.
    pub live_caching_ms: u32,
    /// RTSP frame buffer size.
    pub frame_buffer_size: u32,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u32,
    /// TCP read timeout in milliseconds.
    pub tcp_timeout_ms: u32,
    /// UDP read timeout in milliseconds.
    pub udp_timeout_ms: u32,
    /// Let the transport reconnect on its own.
    pub transport_reconnect: bool,
    /// Delay between transport-level reconnects in milliseconds.
    pub transport_reconnect_delay_ms: u32,
    /// Hardware decoding.
    pub hw_decoding: bool,
    /// Decoder thread count.
    pub decoder_threads: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            rtsp_tcp: true,
            network_caching_ms: 500,
            live_caching_ms: 500,
            frame_buffer_size: 1000,
            connect_timeout_ms: 15_000,
            tcp_timeout_ms: 15_000,
            udp_timeout_ms: 15_000,
            transport_reconnect: true,
            transport_reconnect_delay_ms: 2_000,
            hw_decoding: false,
            decoder_threads: 2,
        }
    }
}

impl StreamOptions {
    /// Option set used by the connection probe: shorter timeouts, no
    /// transport reconnect.
    pub fn probe() -> Self {
        Self {
            connect_timeout_ms: 8_000,
            tcp_timeout_ms: 8_000,
            udp_timeout_ms: 8_000,
            transport_reconnect: false,
            ..Self::default()
        }
    }

    /// Render the options as `:key=value` media options.
    pub fn media_options(&self) -> Vec<String> {
        let mut opts = vec![
            format!(":network-caching={}", self.network_caching_ms),
            format!(":live-caching={}", self.live_caching_ms),
        ];

        if self.rtsp_tcp {
            opts.push(":rtsp-tcp".to_string());
        }

        opts.extend([
            format!(":rtsp-frame-buffer-size={}", self.frame_buffer_size),
            format!(":udp-timeout={}", self.udp_timeout_ms),
            format!(":tcp-timeout={}", self.tcp_timeout_ms),
            format!(":timeout={}", self.connect_timeout_ms),
        ]);

        if self.transport_reconnect {
            opts.extend([
                ":http-reconnect=1".to_string(),
                ":reconnect=1".to_string(),
                format!(":reconnect-delay={}", self.transport_reconnect_delay_ms),
            ]);
        }

        if !self.hw_decoding {
            opts.push(":no-avcodec-hw".to_string());
        }

        opts.push(format!(":avcodec-threads={}", self.decoder_threads));
        opts
    }
}

/// Options applied when constructing the engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub drop_late_frames: bool,
    pub skip_frames: bool,
    /// Engine log verbosity (0-3).
    pub verbosity: u8,
    /// Engine diagnostic log file. `None` keeps engine logs off disk.
    pub log_file: Option<PathBuf>,
    /// Extra raw arguments passed through untouched.
    pub extra_args: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            drop_late_frames: false,
            skip_frames: false,
            verbosity: 3,
            log_file: None,
            extra_args: Vec::new(),
        }
    }
}

impl EngineOptions {
    /// Render the options as engine instance arguments.
    pub fn instance_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if !self.drop_late_frames {
            args.push("--no-drop-late-frames".to_string());
        }
        if !self.skip_frames {
            args.push("--no-skip-frames".to_string());
        }
        args.push(format!("--verbose={}", self.verbosity));

        if let Some(ref path) = self.log_file {
            args.push("--file-logging".to_string());
            args.push(format!("--logfile={}", path.display()));
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}
