//! Pipeline recommendations

use super::stage::{not_attempted, PipelineStage, StageResult};

/// Message emitted when every planned stage ran and passed
pub const READY_FOR_DEPLOYMENT: &str = "All stages passed. The build is ready for deployment.";

fn remediation(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Preparation => "Fix the build environment before running tests.",
        PipelineStage::UnitTesting => "Fix failing unit tests.",
        PipelineStage::IntegrationTesting => "Fix failing integration tests.",
        PipelineStage::PerformanceTesting => {
            "Investigate performance regressions in response time and memory usage."
        }
        PipelineStage::SecurityTesting => "Address the reported security vulnerabilities.",
        PipelineStage::CodeQuality => "Improve code quality and test coverage.",
        PipelineStage::DeploymentValidation => "Resolve deployment validation failures.",
        PipelineStage::Completed => "Review the pipeline configuration.",
    }
}

/// Recommendations derived only from the recorded results and the plan
pub fn generate_recommendations(
    stage_results: &[StageResult],
    planned: &[PipelineStage],
) -> Vec<String> {
    let mut recommendations: Vec<String> = stage_results
        .iter()
        .filter(|r| !r.success)
        .map(|r| remediation(r.stage).to_string())
        .collect();

    recommendations.extend(
        not_attempted(stage_results, planned)
            .into_iter()
            .map(|stage| format!("{} was not attempted.", stage.title())),
    );

    if recommendations.is_empty() {
        recommendations.push(READY_FOR_DEPLOYMENT.to_string());
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_passed() {
        let planned = [PipelineStage::Preparation, PipelineStage::UnitTesting];
        let results = [
            StageResult::passed(PipelineStage::Preparation, 1),
            StageResult::passed(PipelineStage::UnitTesting, 1),
        ];
        assert_eq!(
            generate_recommendations(&results, &planned),
            vec![READY_FOR_DEPLOYMENT.to_string()]
        );
    }

    #[test]
    fn test_failed_and_not_attempted() {
        let planned = [
            PipelineStage::Preparation,
            PipelineStage::UnitTesting,
            PipelineStage::IntegrationTesting,
        ];
        let results = [
            StageResult::passed(PipelineStage::Preparation, 1),
            StageResult::failed(PipelineStage::UnitTesting, 1, "2 failed"),
        ];

        let recommendations = generate_recommendations(&results, &planned);
        assert_eq!(
            recommendations,
            vec![
                "Fix failing unit tests.".to_string(),
                "Integration Testing was not attempted.".to_string(),
            ]
        );
    }

    #[test]
    fn test_skipped_stage_alone_is_not_ready() {
        let planned = [PipelineStage::Preparation, PipelineStage::UnitTesting];
        let results = [StageResult::passed(PipelineStage::Preparation, 1)];
        let recommendations = generate_recommendations(&results, &planned);
        assert_eq!(recommendations.len(), 1);
        assert!(recommendations[0].contains("not attempted"));
    }
}
