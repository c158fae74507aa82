// harness-cli/src/console.rs
// Human-readable progress lines and run summary

use agent_harness::report::{LoadTestResult, Report, RunOutcome, ScenarioRecord};
use agent_harness::stats::{Grade, ResourceUsage};
use agent_harness::Suite;

const RULE: &str = "============================================================";

pub fn print_banner(suite: Suite, binary: &str) {
    println!("{}", RULE);
    println!("🧪 Agent {} suite", suite);
    println!("   Binary: {}", binary);
    println!("{}\n", RULE);
}

/// One line per scenario as soon as it is recorded
pub fn print_record(record: &ScenarioRecord) {
    let base = record.base();
    let status = if base.success { "✅ PASS" } else { "❌ FAIL" };
    println!(
        "{} {:<24} ({:.2}s)",
        status,
        base.name,
        base.duration.as_secs_f64()
    );

    if let Some(error) = base.error.as_deref().filter(|_| !base.success) {
        println!("    Error: {}", error);
    }

    match record {
        ScenarioRecord::Load(load) => print_load(load),
        ScenarioRecord::Basic(_) => {
            for (key, value) in &base.details {
                println!("    {}: {}", key, value);
            }
        }
    }
}

fn print_load(load: &LoadTestResult) {
    println!("    Operations: {}", load.total_operations);
    println!("    Throughput: {:.2} ops/sec", load.operations_per_second);
    println!("    Success Rate: {:.1}%", load.success_rate * 100.0);
    println!("    Avg Response Time: {:.2}ms", load.avg_latency_ms);
    println!("    P95 Response Time: {:.2}ms", load.p95_latency_ms);
    println!("    P99 Response Time: {:.2}ms", load.p99_latency_ms);

    if !load.errors.is_empty() {
        println!("    Errors: {} (showing first few)", load.errors.len());
        for error in load.errors.iter().take(3) {
            println!("      • {}", error);
        }
    }

    match &load.resource_usage.window {
        ResourceUsage::Measured(usage) => {
            println!("    Avg CPU: {:.1}%", usage.avg_cpu_percent);
            println!("    Max Memory: {:.1}MB", usage.max_memory_mb);
        }
        ResourceUsage::NoData => println!("    Resource usage: no samples"),
    }

    if let Some(trend) = &load.resource_usage.memory_trend {
        println!(
            "    Memory Trend: {:?} ({:+.3}MB/sample, growth {:+.1}MB)",
            trend.trend, trend.slope, trend.growth_mb
        );
    }
}

pub fn print_summary(report: &Report) {
    let summary = &report.summary;

    println!("\n{}", RULE);
    println!("🧪 {} Results", report.suite);
    println!("{}", RULE);
    println!(
        "📊 Tests: {}/{} passed ({:.1}%)",
        summary.passed, summary.total_tests, summary.pass_rate
    );

    if summary.total_operations > 0 {
        println!("📊 Overall Grade: {}", summary.grade);
        println!("⚡ Average Throughput: {:.2} ops/sec", summary.avg_throughput);
        println!("✅ Average Success Rate: {:.1}%", summary.avg_success_rate * 100.0);
        println!("🔢 Total Operations: {}", summary.total_operations);
    }

    println!("⏱️  Total Time: {:.2}s", summary.total_time.as_secs_f64());
    println!(
        "💾 System: {} CPUs, {:.1}GB RAM ({}/{})",
        report.environment.cpu_count,
        report.environment.total_memory_gb,
        report.environment.os,
        report.environment.arch
    );
    println!(
        "📈 Resource samples: {} over {:.1}s",
        report.resource_monitoring.total_samples,
        report.resource_monitoring.monitoring_duration.as_secs_f64()
    );

    match &report.outcome {
        RunOutcome::Aborted { reason } => println!("🛑 Run aborted: {}", reason),
        RunOutcome::Completed if report.suite == Suite::Performance => match summary.grade {
            Grade::A => println!("🎉 Excellent performance!"),
            Grade::B => println!("✅ Good performance"),
            Grade::C => println!("⚠️  Acceptable performance, room for improvement"),
            Grade::D => println!("❌ Performance issues detected"),
        },
        RunOutcome::Completed => {
            if summary.pass_rate >= 100.0 {
                println!("🎉 All tests passed!");
            } else if summary.pass_rate >= 80.0 {
                println!("⚠️  Most tests passed, some issues found");
            } else {
                println!("❌ Significant issues found");
            }
        }
    }
}
