use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use finalcopy::compose::CompositeStrategy;
use finalcopy::config::{AppConfig, Manifest, DEFAULT_CONFIG_PATH};
use finalcopy::draft::draft_document;
use finalcopy::storage::Publisher;
use finalcopy::utils::logger;
use finalcopy::Assembler;

#[derive(Parser)]
#[command(name = "finalcopy")]
#[command(about = "申请材料组装：合并 PDF 与合成 DOCX", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成默认配置并创建发布目录
    Init,
    /// 按清单组装一次成品
    Assemble {
        /// 输入清单 (JSON)
        #[arg(short, long)]
        manifest: PathBuf,
        /// 合成文档策略，覆盖配置
        #[arg(short, long)]
        strategy: Option<CompositeStrategy>,
    },
    /// 从模型输出中提取文档正文并生成 DOCX
    Draft {
        /// 文档类型，决定输出文件名
        #[arg(short, long)]
        doc_type: String,
        /// 模型原始输出文件
        #[arg(short, long)]
        input: PathBuf,
        /// 输出目录，默认发布目录
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// 删除已发布的成品
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init_logger();
    info!("finalcopy 启动");

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            init_command().await?;
        }
        Commands::Assemble { manifest, strategy } => {
            assemble_command(&manifest, strategy).await?;
        }
        Commands::Draft {
            doc_type,
            input,
            out,
        } => {
            draft_command(&doc_type, &input, out).await?;
        }
        Commands::Clean => {
            clean_command().await?;
        }
    }

    Ok(())
}

async fn init_command() -> Result<()> {
    info!("初始化配置...");

    let app_config = AppConfig::default();
    app_config.save(Path::new(DEFAULT_CONFIG_PATH))?;
    info!("已生成配置文件: {}", DEFAULT_CONFIG_PATH);

    let generated = app_config.storage.generated_path();
    tokio::fs::create_dir_all(&generated).await?;
    info!("已创建发布目录: {}", generated.display());

    info!("✅ 初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 设置 base_url 和 media_root", DEFAULT_CONFIG_PATH);
    info!("  2. 运行 'finalcopy assemble --manifest <清单.json>'");

    Ok(())
}

async fn assemble_command(manifest_path: &Path, strategy: Option<CompositeStrategy>) -> Result<()> {
    let app_config = AppConfig::load()?;
    let manifest = Manifest::load(manifest_path)
        .with_context(|| format!("无法读取清单 {}", manifest_path.display()))?;

    let mut assembler = Assembler::from_config(app_config)?;
    if let Some(strategy) = strategy {
        assembler = assembler.with_strategy(strategy);
    }
    info!("合成策略: {}", assembler.strategy());

    match assembler.assemble(&manifest).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            info!("✅ {}", report.summary);
            Ok(())
        }
        Err(e) => {
            let payload = e.payload();
            println!("{}", serde_json::to_string_pretty(&payload)?);
            std::process::exit(if e.is_client_error() { 2 } else { 1 });
        }
    }
}

async fn draft_command(doc_type: &str, input: &Path, out: Option<PathBuf>) -> Result<()> {
    let raw = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("无法读取模型输出 {}", input.display()))?;
    let out_dir = match out {
        Some(dir) => dir,
        None => AppConfig::load()?.storage.generated_path(),
    };
    tokio::fs::create_dir_all(&out_dir).await?;

    let path = draft_document(doc_type, &raw, &out_dir)?;
    info!("✅ 已生成文档: {}", path.display());
    println!("{}", path.display());
    Ok(())
}

async fn clean_command() -> Result<()> {
    info!("开始清理已发布成品...");

    let app_config = AppConfig::load()?;
    let publisher = Publisher::from_config(&app_config.storage);
    let removed = publisher.clean().await?;

    info!("✅ 清理完成！共删除 {} 个文件 ({})", removed, publisher.dir().display());
    Ok(())
}
