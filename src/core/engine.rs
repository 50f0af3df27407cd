use crate::core::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;

/// Runs a pipeline's extract → transform → load phases in order.
pub struct BatchEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> BatchEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub async fn run(&self) -> Result<String> {
        let started = Instant::now();
        tracing::info!("Starting batch run...");

        // Extract
        let items = self.pipeline.extract().await?;
        tracing::info!("📥 Extracted {} manifests", items.len());

        // Transform
        let output = self.pipeline.transform(items).await?;
        tracing::debug!("Transform finished after {:?}", started.elapsed());

        // Load
        let output_path = self.pipeline.load(output).await?;
        tracing::info!(
            "📁 Output saved to: {} (total time {:?})",
            output_path,
            started.elapsed()
        );

        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AppError;
    use std::sync::Mutex;

    struct RecordingPipeline {
        phases: Mutex<Vec<&'static str>>,
        fail_transform: bool,
    }

    #[async_trait::async_trait]
    impl Pipeline for RecordingPipeline {
        type Item = u32;
        type Output = u32;

        async fn extract(&self) -> Result<Vec<u32>> {
            self.phases.lock().unwrap().push("extract");
            Ok(vec![1, 2, 3])
        }

        async fn transform(&self, data: Vec<u32>) -> Result<u32> {
            self.phases.lock().unwrap().push("transform");
            if self.fail_transform {
                return Err(AppError::processing("boom"));
            }
            Ok(data.iter().sum())
        }

        async fn load(&self, result: u32) -> Result<String> {
            self.phases.lock().unwrap().push("load");
            Ok(format!("out/{}", result))
        }
    }

    #[test]
    fn test_phases_run_in_order() {
        let engine = BatchEngine::new(RecordingPipeline {
            phases: Mutex::new(Vec::new()),
            fail_transform: false,
        });

        let path = tokio_test::block_on(engine.run()).unwrap();

        assert_eq!(path, "out/6");
        assert_eq!(
            *engine.pipeline().phases.lock().unwrap(),
            vec!["extract", "transform", "load"]
        );
    }

    #[test]
    fn test_failed_phase_stops_the_run() {
        let engine = BatchEngine::new(RecordingPipeline {
            phases: Mutex::new(Vec::new()),
            fail_transform: true,
        });

        assert!(tokio_test::block_on(engine.run()).is_err());
        assert_eq!(
            *engine.pipeline().phases.lock().unwrap(),
            vec!["extract", "transform"]
        );
    }
}
