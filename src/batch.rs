use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use log::{debug, info};

use crate::classify::Classifier;
use crate::dataset::LabeledImage;
use crate::descriptor::FeatureExtractor;
use crate::error::{Error, Result};
use crate::report::{BatchReport, Outcome};

/// 处理单张图片，输入错误被转换为失败记录，其他错误原样返回
pub fn process_image<C, E>(classifier: &C, extractor: &E, image: &LabeledImage) -> Result<Outcome>
where
    C: Classifier + ?Sized,
    E: FeatureExtractor + ?Sized,
{
    let result = extractor
        .extract(&image.path)
        .and_then(|features| classifier.classify(&features, &image.label));
    match result {
        Ok(r) => Ok(Outcome::Classified(r)),
        Err(e) if e.is_input() => {
            Ok(Outcome::Failed { expected_label: image.label.clone(), reason: e.to_string() })
        }
        Err(e) => Err(e),
    }
}

/// 并行处理一批图片
///
/// 工作线程只负责计算，所有结果由当前线程按输入顺序写入报告。
/// 单张图片的输入错误不会中断任务，其他错误会让任务尽快停止并返回该错误。
pub fn run_batch<C, E>(
    classifier: &C,
    extractor: &E,
    images: &[LabeledImage],
    pb: &ProgressBar,
) -> Result<BatchReport>
where
    C: Classifier + ?Sized,
    E: FeatureExtractor + ?Sized,
{
    let start = Instant::now();
    let calc_time = AtomicU64::new(0);
    let stop = AtomicBool::new(false);
    let mut report = BatchReport::new();
    let mut fatal: Option<Error> = None;

    std::thread::scope(|s| {
        let (job_tx, job_rx) = bounded::<(usize, &LabeledImage)>(32);
        let (result_tx, result_rx) = bounded::<(usize, Result<Outcome>)>(32);

        let stop = &stop;
        s.spawn(move || {
            for job in images.iter().enumerate() {
                if stop.load(Ordering::Relaxed) || job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        for _ in 0..num_cpus::get() {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let calc_time = &calc_time;
            s.spawn(move || {
                while let Ok((i, image)) = job_rx.recv() {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let t = Instant::now();
                    let outcome = process_image(classifier, extractor, image);
                    calc_time.fetch_add(t.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    if result_tx.send((i, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        // 按输入顺序写入，保证每次运行的报告顺序一致
        let mut pending = BTreeMap::new();
        let mut next = 0;
        for (i, outcome) in result_rx.iter() {
            pb.inc(1);
            if fatal.is_some() {
                continue;
            }
            match outcome {
                Ok(outcome) => {
                    if let Outcome::Failed { reason, .. } = &outcome {
                        pb.println(format!("[ERR] {}: {}", images[i].key, reason));
                    }
                    pending.insert(i, outcome);
                }
                Err(e) => {
                    stop.store(true, Ordering::Relaxed);
                    fatal = Some(e);
                    continue;
                }
            }
            while let Some(outcome) = pending.remove(&next) {
                if let Err(e) = report.record(images[next].key.clone(), outcome) {
                    stop.store(true, Ordering::Relaxed);
                    fatal = Some(e);
                    break;
                }
                next += 1;
            }
        }
    });

    if let Some(e) = fatal {
        return Err(e);
    }
    debug!("计算耗时（所有线程合计）: {:.2}s", Duration::from_nanos(calc_time.into_inner()).as_secs_f32());
    info!("处理 {} 张图片，耗时 {:.2}s", report.len(), start.elapsed().as_secs_f32());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::descriptor::FeatureSet;
    use crate::report::{ClassificationResult, Evidence, MatchEvidence};

    /// 文件名即描述符数量，`bad` 开头的文件视为损坏
    struct FakeExtractor;

    impl FeatureExtractor for FakeExtractor {
        fn extract(&self, path: &Path) -> Result<FeatureSet> {
            let stem = path.file_stem().unwrap().to_string_lossy();
            if stem.starts_with("bad") {
                return Err(Error::input(path, "损坏的文件"));
            }
            let n: usize = stem.parse().map_err(|e| Error::input(path, e))?;
            FeatureSet::new(1, vec![0.; n])
        }
    }

    /// 描述符数量为偶数时判为 even，否则为 odd；数量为 999 时模拟内部错误
    struct ParityClassifier;

    impl Classifier for ParityClassifier {
        fn classify(&self, features: &FeatureSet, expected: &str) -> Result<ClassificationResult> {
            if features.len() == 999 {
                return Err(Error::InvalidState("boom".into()));
            }
            let label = if features.len() % 2 == 0 { "even" } else { "odd" };
            Ok(ClassificationResult {
                expected_label: expected.into(),
                evaluated_label: label.into(),
                evidence: Evidence::Matches(MatchEvidence::default()),
            })
        }
    }

    fn images(names: &[(&str, &str)]) -> Vec<LabeledImage> {
        names.iter().map(|(l, f)| LabeledImage::new(*l, format!("/data/{}/{}", l, f))).collect()
    }

    #[test]
    fn test_batch_isolates_input_errors() {
        let mut images = images(&[("even", "bad.npy"), ("odd", "bad_too.npy")]);
        for i in 1..=40 {
            let label = if i % 2 == 0 { "even" } else { "odd" };
            images.extend(self::images(&[(label, &format!("{}.npy", i))]));
        }
        // 一张放错类别的图片
        images.extend(self::images(&[("odd", "100.npy")]));

        let report = run_batch(&ParityClassifier, &FakeExtractor, &images, &ProgressBar::hidden()).unwrap();
        assert_eq!(report.len(), images.len());
        let keys = report.entries().iter().map(|e| e.key.as_str()).collect::<Vec<_>>();
        let expected = images.iter().map(|i| i.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, expected);

        let summary = report.summary();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.error_count, 3);
        assert_eq!(summary.errors, ["even/bad.npy", "odd/bad_too.npy", "odd/100.npy"]);
    }

    #[test]
    fn test_batch_aborts_on_fatal_error() {
        let mut images = (1..=30).map(|i| LabeledImage::new("odd", format!("/x/{}.npy", i))).collect::<Vec<_>>();
        images.insert(12, LabeledImage::new("odd", "/x/999.npy"));
        let err = run_batch(&ParityClassifier, &FakeExtractor, &images, &ProgressBar::hidden()).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_batch_duplicate_key_is_fatal() {
        let images = images(&[("odd", "1.npy"), ("odd", "1.npy")]);
        let err = run_batch(&ParityClassifier, &FakeExtractor, &images, &ProgressBar::hidden()).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
    }

    #[test]
    fn test_batch_labels_with_underscores() {
        let images = images(&[("a_b", "1.npy"), ("a", "b_1.npy"), ("a", "2.npy")]);
        let keys = images.iter().map(|i| i.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, ["a_b/1.npy", "a/b_1.npy", "a/2.npy"]);

        let report = run_batch(&ParityClassifier, &FakeExtractor, &images, &ProgressBar::hidden()).unwrap();
        assert_eq!(report.len(), 3);
        // b_1 无法解析为数量，单独记为失败
        assert_eq!(report.summary().failed, 1);
    }

    #[test]
    fn test_batch_empty() {
        let report = run_batch(&ParityClassifier, &FakeExtractor, &[], &ProgressBar::hidden()).unwrap();
        assert!(report.is_empty());
    }
}
