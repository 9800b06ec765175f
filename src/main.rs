//! synth-stream - 波形合成与流式播放
//!
//! 生成的样本经 codec 编码后，由播放器分块写到 stdout 或文件，
//! 例如：`synth-stream melody | aplay -f S16_LE -c 2 -r 44100`

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rand::SeedableRng;
use rand_pcg::Pcg32;

use synth_stream::audio::{
    self, AudioSink, Encoding, FormatDescriptor, OutputConfig, PacedSink, PlaybackStats, RawSink,
    RawTarget, SinkLine,
};
use synth_stream::decode::{decode_all, DecodedSource};
use synth_stream::engine::{EncodedSource, PlayerConfig, StreamingPlayer};
use synth_stream::synth::{self, demo, notes, Composer, Oscillator, Waveform, WaveformSpec};

/// Synth Stream - waveform synthesis and streaming playback
#[derive(Parser)]
#[command(name = "synth-stream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Sample rate in Hz
    #[arg(short = 'r', long, default_value = "44100", global = true)]
    sample_rate: u32,

    /// Bits per sample
    #[arg(short, long, default_value = "16", global = true)]
    bits: u16,

    /// Channel count
    #[arg(short, long, default_value = "2", global = true)]
    channels: u16,

    /// Sample encoding (pcm-signed, pcm-unsigned, pcm-float, mu-law, a-law)
    #[arg(short, long, default_value = "pcm-signed", global = true)]
    encoding: Encoding,

    /// Big-endian byte order
    #[arg(long, global = true)]
    big_endian: bool,

    /// Chunk size in bytes for each write
    #[arg(long, default_value = "4096", global = true)]
    buffer_size: usize,

    /// Delay before closing the output after the source ends
    #[arg(long, default_value = "3000", global = true)]
    grace_ms: u64,

    /// Amplitude of generated tones, within (0, 1]
    #[arg(long, default_value = "0.01", global = true)]
    volume: f32,

    /// Seed for noise generation
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Repeat playback until Ctrl+C
    #[arg(long = "loop", global = true)]
    looping: bool,

    /// Consume output at playback speed instead of as fast as possible
    #[arg(long, global = true)]
    realtime: bool,

    /// Output file, '-' for stdout
    #[arg(short, long, default_value = "-", global = true)]
    output: String,

    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a single waveform
    Tone {
        /// Waveform (sine, saw, square, triangle, noise)
        #[arg(short, long, default_value = "sine")]
        waveform: Waveform,

        /// Frequency in Hz
        #[arg(short, long, default_value = "440")]
        frequency: f64,

        /// Note name such as A4 or C#3, overrides --frequency
        #[arg(short, long)]
        note: Option<String>,

        /// Duration in seconds, 0 plays until Ctrl+C
        #[arg(short, long, default_value = "1.0")]
        duration: f64,

        /// Phase as a fraction of a period, within [0, 1)
        #[arg(short, long, default_value = "0")]
        phase: f32,
    },

    /// Play every waveform in turn
    Tour,

    /// Play a short nursery melody
    Melody {
        #[arg(short, long, default_value = "triangle")]
        waveform: Waveform,
    },

    /// Sweep linearly between two frequencies
    Sweep {
        #[arg(short, long, default_value = "triangle")]
        waveform: Waveform,

        #[arg(long, default_value = "300")]
        from: f64,

        #[arg(long, default_value = "14")]
        to: f64,

        #[arg(short, long, default_value = "3.0")]
        duration: f64,
    },

    /// Decode an audio file and stream it
    PlayFile {
        file: PathBuf,

        /// Start position in seconds
        #[arg(long)]
        start: Option<f64>,
    },

    /// Decode an audio file and mix a tone into it
    MixFile {
        file: PathBuf,

        #[arg(short, long, default_value = "sine")]
        waveform: Waveform,

        #[arg(short, long, default_value = "440")]
        frequency: f64,
    },

    /// Convert raw bytes from the global format into another format
    Convert {
        /// Raw input bytes in the format given by the global options
        input: PathBuf,

        #[arg(long)]
        to_encoding: Encoding,

        #[arg(long)]
        to_bits: u16,

        #[arg(long)]
        to_big_endian: bool,
    },

    /// Show the configured format and supported options
    Formats,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let format = create_format(&cli)?;

    match &cli.command {
        Commands::Tone {
            waveform,
            frequency,
            note,
            duration,
            phase,
        } => {
            let frequency = match note {
                Some(name) => notes::key_frequency(
                    notes::parse_note(name)
                        .ok_or_else(|| anyhow::anyhow!("invalid note name: {}", name))?,
                ),
                None => *frequency,
            };
            play_tone(&cli, &format, *waveform, frequency, *duration, *phase)?;
        }
        Commands::Tour => {
            let composer = Composer::new(format.sample_rate)?;
            let samples = demo::waveform_tour(&composer, cli.volume)?;
            stream_samples(&cli, samples, &format)?;
        }
        Commands::Melody { waveform } => {
            let composer = Composer::new(format.sample_rate)?;
            let samples = demo::melody(&composer, *waveform, cli.volume)?;
            stream_samples(&cli, samples, &format)?;
        }
        Commands::Sweep {
            waveform,
            from,
            to,
            duration,
        } => {
            let mut rng = create_rng(&cli);
            let sweep = synth::frequency_sweep(
                &mut rng,
                *waveform,
                cli.volume,
                *duration,
                *from,
                *to,
                format.sample_rate,
            )?;
            stream_samples(&cli, sweep.samples, &format)?;
        }
        Commands::PlayFile { file, start } if cli.looping => {
            if start.is_some() {
                log::warn!("--start is ignored when looping");
            }
            let (bytes, file_format) = decode_all(file)?;
            eprintln!("Looping {} as {}", file.display(), file_format);
            stream(&cli, Source::Looping(Cursor::new(bytes)), &file_format)?;
        }
        Commands::PlayFile { file, start } => {
            let mut source = DecodedSource::open(file)?;
            if let Some(secs) = start {
                source.seek(*secs)?;
            }
            let file_format = source.format();
            let info = source.info();
            eprintln!(
                "{} | {} | {:.1}s -> {}",
                info.format,
                info.codec,
                info.duration_secs.unwrap_or(0.0),
                file_format
            );
            stream(&cli, Source::once(source), &file_format)?;
        }
        Commands::MixFile {
            file,
            waveform,
            frequency,
        } => {
            mix_file(&cli, file, *waveform, *frequency)?;
        }
        Commands::Convert {
            input,
            to_encoding,
            to_bits,
            to_big_endian,
        } => {
            let to = FormatDescriptor::new(
                *to_encoding,
                format.sample_rate,
                *to_bits,
                format.channels,
                *to_big_endian,
            )?;
            let bytes = fs::read(input)?;
            let converted = audio::transcode(&bytes, &format, &to)?;

            let mut line = RawSink::new(RawTarget::from_arg(&cli.output)).open(&to)?;
            line.write_all(&converted)?;
            line.close()?;
            eprintln!(
                "Converted {} bytes ({}) -> {} bytes ({})",
                bytes.len(),
                format,
                converted.len(),
                to
            );
        }
        Commands::Formats => show_formats(&format),
    }

    Ok(())
}

/// 单个波形：有限时长用惰性序列，时长为 0 时用无限振荡器
fn play_tone(
    cli: &Cli,
    format: &FormatDescriptor,
    waveform: Waveform,
    frequency: f64,
    duration: f64,
    phase: f32,
) -> anyhow::Result<()> {
    let rng = create_rng(cli);
    if duration == 0.0 {
        let oscillator =
            Oscillator::with_rng(waveform, frequency, cli.volume, format.sample_rate, rng)?;
        eprintln!("Playing {} at {:.2}Hz, press Ctrl+C to stop", waveform, frequency);
        return stream(cli, Source::once(EncodedSource::new(oscillator, *format)?), format);
    }

    let spec = WaveformSpec::new(
        waveform,
        frequency,
        cli.volume,
        duration,
        notes::phase01_to_radians(phase)?,
    )?;
    let samples = spec.samples_with_rng(format.sample_rate, rng);
    if cli.looping {
        return stream_samples(cli, samples.collect(), format);
    }
    stream(cli, Source::once(EncodedSource::new(samples, *format)?), format)
}

/// 解码文件、叠加一个同样长度的音，再按文件格式播放
fn mix_file(cli: &Cli, file: &Path, waveform: Waveform, frequency: f64) -> anyhow::Result<()> {
    let (bytes, file_format) = decode_all(file)?;
    let file_samples = audio::decode_to_vec(&bytes, &file_format)?;

    let channels = file_format.channels as usize;
    let frames = file_samples.len() / channels;
    let spec = WaveformSpec::new(
        waveform,
        frequency,
        cli.volume,
        file_format.duration_secs(frames),
        0.0,
    )?;
    let mut tone: Vec<f32> = spec
        .samples_with_rng(file_format.sample_rate, create_rng(cli))
        .collect();
    tone.truncate(frames);

    let mixed = synth::mix(&file_samples, &synth::interleave(&tone, file_format.channels));
    eprintln!(
        "Mixing {} with {} at {:.2}Hz ({} frames)",
        file.display(),
        waveform,
        frequency,
        frames
    );

    let bytes = audio::encode_to_vec(&mixed, &file_format)?;
    let source = if cli.looping {
        Source::Looping(Cursor::new(bytes))
    } else {
        Source::once(Cursor::new(bytes))
    };
    stream(cli, source, &file_format)
}

/// 单声道样本序列 → 按格式复制到每个声道后播放
fn stream_samples(cli: &Cli, samples: Vec<f32>, format: &FormatDescriptor) -> anyhow::Result<()> {
    eprintln!(
        "Streaming {:.2}s of audio as {}",
        format.duration_secs(samples.len()),
        format
    );
    if cli.looping {
        let bytes = audio::encode_to_vec(&synth::interleave(&samples, format.channels), format)?;
        return stream(cli, Source::Looping(Cursor::new(bytes)), format);
    }
    stream(cli, Source::once(EncodedSource::new(samples.into_iter(), *format)?), format)
}

/// 播放的字节源：单次，或可以回到开头的循环源
enum Source {
    Once(Box<dyn Read + Send>),
    Looping(Cursor<Vec<u8>>),
}

impl Source {
    fn once<R: Read + Send + 'static>(source: R) -> Self {
        Self::Once(Box::new(source))
    }
}

/// 选择输出端并播放
fn stream(cli: &Cli, source: Source, format: &FormatDescriptor) -> anyhow::Result<()> {
    let raw = RawSink::new(RawTarget::from_arg(&cli.output));
    if cli.realtime {
        let paced = PacedSink::new(raw, OutputConfig::default());
        let stats = paced.stats();
        run_player(cli, paced, source, format, Some(stats))
    } else {
        run_player(cli, raw, source, format, None)
    }
}

fn run_player<S>(
    cli: &Cli,
    sink: S,
    source: Source,
    format: &FormatDescriptor,
    stats: Option<Arc<PlaybackStats>>,
) -> anyhow::Result<()>
where
    S: AudioSink + Send + 'static,
{
    let player = Arc::new(StreamingPlayer::new(sink, create_player_config(cli)));

    // Ctrl+C 提前关闭（取消延迟关闭，释放输出）
    let p = Arc::clone(&player);
    ctrlc::set_handler(move || {
        log::info!("Interrupted, closing output");
        if let Err(e) = p.close() {
            log::warn!("Error closing player: {}", e);
        }
    })?;

    let written = match source {
        Source::Once(source) => player.play(source, format)?,
        Source::Looping(source) => {
            eprintln!("Looping, press Ctrl+C to stop");
            player.play_looping(source, format)?
        }
    };
    eprintln!(
        "Wrote {} bytes ({:.2}s of audio)",
        written,
        written as f64 / format.bytes_per_second() as f64
    );

    // 等待宽限期结束后的延迟关闭
    player.wait_closed();

    if let Some(stats) = stats {
        let report = stats.report();
        if report.starved_ticks > 0 {
            log::warn!("Output starved for {} ticks", report.starved_ticks);
        }
        if cli.verbose {
            eprintln!("\n{}", report);
        }
    }

    Ok(())
}

/// 命令行选项 → 格式
fn create_format(cli: &Cli) -> anyhow::Result<FormatDescriptor> {
    Ok(FormatDescriptor::new(
        cli.encoding,
        cli.sample_rate,
        cli.bits,
        cli.channels,
        cli.big_endian,
    )?)
}

/// 命令行选项 → 播放器配置
fn create_player_config(cli: &Cli) -> PlayerConfig {
    PlayerConfig {
        buffer_size: cli.buffer_size.max(1),
        close_grace: std::time::Duration::from_millis(cli.grace_ms),
        looping: cli.looping,
    }
}

/// 有种子时可复现，否则随机取种子
fn create_rng(cli: &Cli) -> Pcg32 {
    Pcg32::seed_from_u64(cli.seed.unwrap_or_else(rand::random))
}

fn show_formats(format: &FormatDescriptor) {
    println!("=== Output Format ===\n");
    println!("  Format:           {}", format);
    println!("  Bytes per sample: {}", format.bytes_per_sample());
    println!("  Bytes per frame:  {}", format.bytes_per_frame());
    println!("  Bytes per second: {}", format.bytes_per_second());

    println!("\nEncodings:");
    for encoding in Encoding::ALL {
        let depths = match encoding {
            Encoding::PcmFloat => "32, 64",
            Encoding::MuLaw | Encoding::ALaw => "8",
            _ => "1-64",
        };
        println!("  {:<14} bits: {}", encoding.name(), depths);
    }

    println!("\nWaveforms:");
    for waveform in Waveform::ALL {
        println!("  {}", waveform);
    }
}
