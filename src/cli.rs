//! コマンドライン引数と各サブコマンドの実行。
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::corpus::{Corpus, interleave_documents, load_author_documents};
use crate::feature::{FeatureKind, FeatureModel, FeatureSelection, ModelPaths};
use crate::observability::Telemetry;
use crate::pipeline::{Experiment, Pipeline, PipelineBuilder};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use the built-in fallback tagger instead of the tagger service
    #[arg(long, global = true, env = "AUTHOR_CLUSTER_OFFLINE")]
    pub offline: bool,

    /// Write the Prometheus text exposition to this file on exit
    #[arg(long, global = true, env = "AUTHOR_CLUSTER_METRICS_OUT")]
    pub metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Split a corpus directory into a prepared sentence set
    Prepare(PrepareArgs),
    /// Build per-kind n-gram vocabularies from a training corpus
    BuildModel(BuildModelArgs),
    /// Chunk, vectorize, filter, cluster and report purity
    ClusterAndEvaluate(ClusterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    /// Corpus directory laid out as <dir>/<author>/<file>
    pub corpus_dir: PathBuf,

    /// Output sentence set (JSON Lines)
    #[arg(long, short, default_value = "sentences.jsonl")]
    pub output: PathBuf,

    /// Shuffle whole documents into one multi-author stream
    #[arg(long)]
    pub interleave: bool,

    /// Seed for the document shuffle
    #[arg(long, env = "AUTHOR_CLUSTER_SEED")]
    pub seed: Option<u64>,

    /// Write the interleaved text here
    #[arg(long, requires = "interleave")]
    pub text_out: Option<PathBuf>,

    /// Write the interleaved span metadata (start,end,author) here
    #[arg(long, requires = "interleave")]
    pub metadata_out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BuildModelArgs {
    /// Corpus directory, or a prepared sentence set (.jsonl)
    pub input: PathBuf,

    /// Directory for the vocabulary files
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Override one vocabulary path, e.g. `--path w=words.txt`
    #[arg(long = "path", value_parser = parse_kind_path)]
    pub paths: Vec<(FeatureKind, PathBuf)>,

    /// Feature kinds to build (flag letters w W t c p P T F)
    #[arg(long, default_value = "wWtcpPTF")]
    pub features: FeatureSelection,

    /// Keep only the N most frequent entries per kind
    #[arg(long)]
    pub vocab_cap: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// Prepared sentence set (.jsonl) or corpus directory
    pub sentences: PathBuf,

    /// Directory holding the vocabulary files
    #[arg(long, default_value = ".")]
    pub model_dir: PathBuf,

    /// Override one vocabulary path, e.g. `--path c=chars.txt`
    #[arg(long = "path", value_parser = parse_kind_path)]
    pub paths: Vec<(FeatureKind, PathBuf)>,

    /// Sentences per chunk
    #[arg(long, env = "AUTHOR_CLUSTER_CHUNK_SIZE")]
    pub chunk_size: usize,

    /// Number of clusters
    #[arg(long, short = 'k', env = "AUTHOR_CLUSTER_CLUSTERS")]
    pub clusters: usize,

    /// Feature kinds to use (flag letters w W t c p P T F)
    #[arg(long, default_value = "wWtcpPTF")]
    pub features: FeatureSelection,

    /// Bernoulli p of the variance threshold
    #[arg(long)]
    pub variance_p: Option<f64>,

    /// Seed for the clustering engine
    #[arg(long)]
    pub seed: Option<u64>,

    /// Append the report to this file
    #[arg(long)]
    pub report_out: Option<PathBuf>,

    /// Print the outcome as JSON instead of the text report
    #[arg(long)]
    pub json: bool,
}

/// `KIND=PATH` を解析する。`KIND` はフラグ文字（`w`）か名前（`word`）。
fn parse_kind_path(raw: &str) -> Result<(FeatureKind, PathBuf), String> {
    let (kind, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=PATH, got `{raw}`"))?;
    let kind = parse_kind(kind).ok_or_else(|| format!("unknown feature kind `{kind}`"))?;
    if path.is_empty() {
        return Err(format!("empty path for `{kind}`"));
    }
    Ok((kind, PathBuf::from(path)))
}

fn parse_kind(raw: &str) -> Option<FeatureKind> {
    let mut chars = raw.chars();
    if let (Some(flag), None) = (chars.next(), chars.next()) {
        return FeatureKind::from_flag(flag);
    }
    FeatureKind::ALL.into_iter().find(|kind| kind.as_str() == raw)
}

fn model_paths(
    dir: &Path,
    selection: &FeatureSelection,
    overrides: &[(FeatureKind, PathBuf)],
) -> ModelPaths {
    let mut paths = ModelPaths::in_dir(dir, selection);
    for (kind, path) in overrides {
        if selection.contains(*kind) {
            paths.set(*kind, path.clone());
        }
    }
    paths
}

/// 入力がファイルなら準備済みの文集合、ディレクトリならコーパスとして読む。
async fn load_corpus(pipeline: &Pipeline, input: &Path) -> Result<Corpus> {
    if input.is_dir() {
        let documents = load_author_documents(input)
            .await
            .with_context(|| format!("failed to read corpus directory {}", input.display()))?;
        Ok(pipeline.prepare_corpus(&documents).await?)
    } else {
        Corpus::load_jsonl(input)
            .with_context(|| format!("failed to read sentence set {}", input.display()))
    }
}

/// 解析済みの引数でサブコマンドを実行する。
///
/// # Errors
/// 入出力、タガー、パイプラインのいずれかが失敗した場合はエラーを返す。
pub async fn run(
    cli: Cli,
    config: &Config,
    telemetry: &Telemetry,
    cancel: CancellationToken,
) -> Result<()> {
    let pipeline = PipelineBuilder::from_config(config, cli.offline, Some(telemetry.metrics()))
        .context("failed to build pipeline")?
        .build();

    let result = match cli.command {
        Command::Prepare(args) => prepare(&pipeline, args).await,
        Command::BuildModel(args) => build_model(&pipeline, config, args).await,
        Command::ClusterAndEvaluate(args) => {
            cluster_and_evaluate(&pipeline, config, args, &cancel).await
        }
    };

    if let Some(path) = &cli.metrics_out {
        std::fs::write(path, telemetry.render_prometheus())
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    result
}

async fn prepare(pipeline: &Pipeline, args: PrepareArgs) -> Result<()> {
    let mut documents = load_author_documents(&args.corpus_dir)
        .await
        .with_context(|| format!("failed to read corpus directory {}", args.corpus_dir.display()))?;

    if args.interleave {
        let mut rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let interleaved = interleave_documents(documents, &mut rng);
        if let Some(path) = &args.text_out {
            std::fs::write(path, &interleaved.text)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        if let Some(path) = &args.metadata_out {
            std::fs::write(path, interleaved.metadata())
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        documents = interleaved.documents;
    }

    let corpus = pipeline.prepare_corpus(&documents).await?;
    if corpus.is_empty() {
        bail!("corpus {} produced no sentences", args.corpus_dir.display());
    }
    corpus.save_jsonl(&args.output)?;
    info!(
        sentences = corpus.len(),
        authors = corpus.authors().len(),
        output = %args.output.display(),
        "sentence set written"
    );
    Ok(())
}

async fn build_model(pipeline: &Pipeline, config: &Config, args: BuildModelArgs) -> Result<()> {
    let corpus = load_corpus(pipeline, &args.input).await?;
    let mut options = config.builder_options();
    if let Some(cap) = args.vocab_cap {
        options.vocab_cap = Some(cap);
    }

    let model = pipeline
        .build_model(&corpus, &args.features, options)
        .await?;
    let paths = model_paths(&args.output_dir, &args.features, &args.paths);
    model.save(&paths)?;
    for (kind, path) in paths.iter() {
        info!(feature_kind = %kind, path = %path.display(), "vocabulary written");
    }
    Ok(())
}

async fn cluster_and_evaluate(
    pipeline: &Pipeline,
    config: &Config,
    args: ClusterArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let selection = args.features.validate()?;
    let corpus = load_corpus(pipeline, &args.sentences).await?;
    let paths = model_paths(&args.model_dir, &selection, &args.paths);
    let model = FeatureModel::load(&paths, config.char_ngram().get())
        .context("failed to load feature model")?;

    let experiment = Experiment {
        chunk_size: args.chunk_size,
        k: args.clusters,
        selection,
        variance_p: args.variance_p.unwrap_or_else(|| config.variance_p()),
        seed: args.seed.or_else(|| config.seed()),
        max_iterations: config.kmeans_max_iter().get(),
    };
    let outcome = pipeline
        .run_experiment(&corpus, Arc::new(model), &experiment, cancel)
        .await?;

    let rendered = if args.json {
        let mut json = serde_json::to_string_pretty(&outcome)?;
        json.push('\n');
        json
    } else {
        outcome.to_string()
    };
    print!("{rendered}");

    if let Some(path) = &args.report_out {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open report file {}", path.display()))?;
        file.write_all(rendered.as_bytes())
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[rstest]
    #[case("w=words.txt", FeatureKind::Word, "words.txt")]
    #[case("char_ngram=/tmp/c.txt", FeatureKind::CharNgram, "/tmp/c.txt")]
    #[case("F=four.txt", FeatureKind::PosFourgram, "four.txt")]
    fn parses_kind_paths(#[case] raw: &str, #[case] kind: FeatureKind, #[case] path: &str) {
        assert_eq!(parse_kind_path(raw), Ok((kind, PathBuf::from(path))));
    }

    #[rstest]
    #[case("words.txt")]
    #[case("x=words.txt")]
    #[case("w=")]
    fn rejects_malformed_kind_paths(#[case] raw: &str) {
        assert!(parse_kind_path(raw).is_err());
    }

    #[test]
    fn overrides_apply_only_to_selected_kinds() {
        let selection: FeatureSelection = "wc".parse().expect("flags");
        let paths = model_paths(
            Path::new("model"),
            &selection,
            &[
                (FeatureKind::Word, PathBuf::from("custom.txt")),
                (FeatureKind::Pos, PathBuf::from("pos.txt")),
            ],
        );
        assert_eq!(paths.get(FeatureKind::Word), Some(Path::new("custom.txt")));
        assert_eq!(
            paths.get(FeatureKind::CharNgram),
            Some(Path::new("model/output_char.txt"))
        );
        assert_eq!(paths.get(FeatureKind::Pos), None);
    }

    #[test]
    fn parses_cluster_and_evaluate() {
        let cli = Cli::try_parse_from([
            "author-cluster",
            "--offline",
            "cluster-and-evaluate",
            "sentences.jsonl",
            "--chunk-size",
            "30",
            "-k",
            "2",
            "--features",
            "cP",
            "--json",
        ])
        .expect("valid arguments");

        assert!(cli.offline);
        let Command::ClusterAndEvaluate(args) = cli.command else {
            panic!("expected cluster-and-evaluate");
        };
        assert_eq!(args.chunk_size, 30);
        assert_eq!(args.clusters, 2);
        assert!(args.json);
        assert_eq!(
            args.features.kinds().collect::<Vec<_>>(),
            vec![FeatureKind::CharNgram, FeatureKind::PosBigram]
        );
    }
}
