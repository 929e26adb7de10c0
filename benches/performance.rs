//! 合成チャンクのベクトル化とクラスタリングのベンチマーク。
use std::sync::Arc;

use author_cluster::chunk::chunk;
use author_cluster::cluster::kmeans::KMeans;
use author_cluster::corpus::{Corpus, Sentence};
use author_cluster::feature::{
    BuilderOptions, FeatureModel, FeatureModelBuilder, FeatureSelection, Vectorizer,
    vectorizer::presence_vector,
};
use author_cluster::selection::to_matrix;
use author_cluster::tagger::{FallbackTagger, Tagger};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const WORDS: [&str; 12] = [
    "river", "Stone", "quietly", "42", "ran", "the", "of", "LIGHT", "under", "whose", ",", "near",
];

fn synthetic_corpus(sentences: usize) -> Corpus {
    let mut corpus = Corpus::new();
    for i in 0..sentences {
        let text: Vec<&str> = (0..12).map(|j| WORDS[(i * 7 + j * 5) % WORDS.len()]).collect();
        corpus.push(Sentence::new(format!("author-{}", i % 3), text.join(" ")));
    }
    corpus
}

fn setup(runtime: &Runtime) -> (Corpus, Arc<FeatureModel>, FeatureSelection) {
    let corpus = synthetic_corpus(600);
    let selection = FeatureSelection::all();
    let tagger = FallbackTagger::new();
    let model = runtime
        .block_on(
            FeatureModelBuilder::new(&tagger, BuilderOptions::default()).build(&corpus, &selection),
        )
        .expect("model");
    (corpus, Arc::new(model), selection)
}

fn bench_presence_vector(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let (corpus, model, selection) = setup(&runtime);
    let chunks = chunk(corpus.sentences(), 20).expect("chunks");
    let tagger = FallbackTagger::new();
    let tagged: Vec<_> = chunks
        .iter()
        .map(|chunk| {
            runtime
                .block_on(tagger.tag_parts_of_speech(&chunk.text))
                .expect("tagging")
        })
        .collect();

    c.bench_function("presence_vector_30_chunks", |b| {
        b.iter(|| {
            for (chunk, tagged) in chunks.iter().zip(&tagged) {
                black_box(presence_vector(&model, &selection, &chunk.text, tagged).len());
            }
        });
    });
}

fn bench_vectorize_and_cluster(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let (corpus, model, selection) = setup(&runtime);
    let chunks = chunk(corpus.sentences(), 20).expect("chunks");
    let vectorizer = Vectorizer::new(model, selection, Arc::new(FallbackTagger::new()))
        .expect("vectorizer")
        .with_workers(4);

    c.bench_function("vectorize_all_30_chunks", |b| {
        b.iter(|| {
            let vectors = runtime
                .block_on(vectorizer.vectorize_all(&chunks, &CancellationToken::new()))
                .expect("vectors");
            black_box(vectors.len());
        });
    });

    let vectors = runtime
        .block_on(vectorizer.vectorize_all(&chunks, &CancellationToken::new()))
        .expect("vectors");
    let matrix = to_matrix(&vectors).expect("matrix");
    c.bench_function("kmeans_k3_30_rows", |b| {
        b.iter(|| {
            let mut rng = StdRng::seed_from_u64(7);
            let fitted = KMeans::fit(&matrix, 3, 100, &mut rng);
            black_box(fitted.assignments.len());
        });
    });
}

criterion_group!(benches, bench_presence_vector, bench_vectorize_and_cluster);
criterion_main!(benches);
