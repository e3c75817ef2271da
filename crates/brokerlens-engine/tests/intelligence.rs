use brokerlens_core::config::Config;
use brokerlens_core::error::AnalyticsError;
use brokerlens_core::session::{ConversionKind, StartSessionOptions};
use brokerlens_core::time::Timeframe;
use brokerlens_engine::export::ExportFormat;
use brokerlens_engine::intelligence::{
    AiInsightContext, BusinessIntelligenceReport, DashboardRequest, ReportConfig,
    ReportFrequency, ReportType, ScheduleRequest, Widget, WidgetData, WidgetType,
};
use brokerlens_engine::services::AnalyticsServices;
use brokerlens_engine::tracker::{BehaviorFilters, ConversionInput};

fn services() -> AnalyticsServices {
    AnalyticsServices::local(&Config::default())
}

async fn seed_sessions(services: &AnalyticsServices) {
    for i in 0..6 {
        let session_id = services
            .tracker
            .start_session(StartSessionOptions {
                landing_url: Some("/brokers/compare".to_string()),
                ..StartSessionOptions::default()
            })
            .await;
        if i % 2 == 0 {
            services
                .tracker
                .track_conversion(
                    &session_id,
                    ConversionInput::new(ConversionKind::Signup, Some(120.0)),
                )
                .await;
        }
    }
}

#[tokio::test]
async fn report_covers_key_metrics_and_serializes() {
    let services = services();
    seed_sessions(&services).await;
    let config = ReportConfig {
        report_type: ReportType::Operational,
        timeframe: Timeframe::Week,
        include_forecasts: true,
        include_competitive: true,
        ..ReportConfig::default()
    };
    let report = services
        .intelligence
        .generate_report(&config)
        .await
        .expect("report");

    assert!(report.id.starts_with("bi_report_"));
    assert_eq!(report.title, "Business Intelligence Report - operational");
    assert_eq!(report.key_metrics.len(), 6);
    assert_eq!(report.forecasts.len(), 3);
    assert_eq!(report.competitive_analysis.segment, "Forex Brokers");
    let revenue = report
        .key_metrics
        .iter()
        .find(|m| m.name == "revenue")
        .expect("revenue metric");
    assert!((revenue.current_value - 360.0).abs() < 1e-9);

    let json = serde_json::to_string(&report).expect("serialize");
    let decoded: BusinessIntelligenceReport = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(decoded.id, report.id);
    assert_eq!(decoded.key_metrics.len(), report.key_metrics.len());

    let stored = services.intelligence.get_report(&report.id).await;
    assert!(stored.is_some());
}

#[tokio::test]
async fn custom_metrics_restrict_key_metrics() {
    let services = services();
    let config = ReportConfig {
        custom_metrics: vec!["revenue".to_string(), "page_speed".to_string()],
        ..ReportConfig::default()
    };
    let report = services
        .intelligence
        .generate_report(&config)
        .await
        .expect("report");
    let names: Vec<&str> = report.key_metrics.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["revenue", "page_speed"]);
    assert!(report.forecasts.is_empty());
}

#[tokio::test]
async fn export_checks_report_before_format() {
    let services = services();
    let err = services
        .intelligence
        .export_report("bi_report_missing", ExportFormat::Pdf)
        .await
        .expect_err("unknown report");
    assert!(matches!(err, AnalyticsError::NotFound(_)));

    let report = services
        .intelligence
        .generate_report(&ReportConfig::default())
        .await
        .expect("report");
    for format in [ExportFormat::Pdf, ExportFormat::Excel, ExportFormat::Powerpoint] {
        let err = services
            .intelligence
            .export_report(&report.id, format)
            .await
            .expect_err("unsupported");
        assert!(matches!(err, AnalyticsError::UnsupportedFormat(_)));
    }

    let csv = services
        .intelligence
        .export_report(&report.id, ExportFormat::Csv)
        .await
        .expect("csv export");
    let text = String::from_utf8(csv.bytes).expect("utf8");
    assert!(text.starts_with("section,metric,value"));
    assert!(text.contains("executive_summary"));
    assert!(csv.filename.ends_with(".csv"));
    assert_eq!(csv.expires_at - csv.generated_at, chrono::Duration::hours(24));
}

#[tokio::test]
async fn unknown_dashboard_is_not_found() {
    let services = services();
    let err = services
        .intelligence
        .get_dashboard_data("dashboard_nope", BehaviorFilters::default())
        .await
        .expect_err("missing dashboard");
    match err {
        AnalyticsError::NotFound(what) => assert_eq!(what, "Dashboard dashboard_nope"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn created_dashboard_renders_its_widgets() {
    let services = services();
    seed_sessions(&services).await;
    let widget = |id: &str, widget_type: WidgetType, metric: &str| Widget {
        id: id.to_string(),
        widget_type,
        title: id.to_string(),
        data_source: "user_behavior".to_string(),
        metrics: vec![metric.to_string()],
        aggregation: "sum".to_string(),
        thresholds: Vec::new(),
        position: Default::default(),
        size: Default::default(),
    };
    let id = services
        .intelligence
        .create_dashboard(DashboardRequest {
            name: Some("Acquisition".to_string()),
            widgets: vec![
                widget("sessions_kpi", WidgetType::Kpi, "sessions"),
                widget("revenue_chart", WidgetType::Chart, "revenue"),
                widget("notes", WidgetType::Text, "sessions"),
            ],
            ..DashboardRequest::default()
        })
        .await;
    assert_eq!(services.intelligence.list_dashboards().await.len(), 4);

    let data = services
        .intelligence
        .get_dashboard_data(&id, BehaviorFilters::default())
        .await
        .expect("dashboard data");
    match &data.widgets["sessions_kpi"] {
        WidgetData::Kpi { value, .. } => assert_eq!(*value, 6.0),
        other => panic!("unexpected widget: {other:?}"),
    }
    match &data.widgets["revenue_chart"] {
        WidgetData::Chart { points } => {
            assert_eq!(points.len(), 30);
            assert_eq!(points.last().map(|p| p.value), Some(360.0));
        }
        other => panic!("unexpected widget: {other:?}"),
    }
    assert_eq!(data.widgets["notes"], WidgetData::Empty);
    assert_eq!(
        (data.next_update - data.last_updated).num_milliseconds(),
        300_000
    );
}

#[tokio::test]
async fn schedules_need_recipients_and_deliver_when_due() {
    let services = services();
    let err = services
        .intelligence
        .schedule_report(
            ReportConfig::default(),
            ScheduleRequest {
                frequency: ReportFrequency::Daily,
                recipients: Vec::new(),
                format: None,
            },
        )
        .await
        .expect_err("no recipients");
    assert!(matches!(err, AnalyticsError::Validation(_)));

    let id = services
        .intelligence
        .schedule_report(
            ReportConfig::default(),
            ScheduleRequest {
                frequency: ReportFrequency::Weekly,
                recipients: vec!["ceo@example.com".to_string()],
                format: Some(ExportFormat::Json),
            },
        )
        .await
        .expect("scheduled");
    let now = chrono::Utc::now();
    assert_eq!(services.intelligence.process_scheduled_reports(now).await, 1);
    assert_eq!(services.intelligence.process_scheduled_reports(now).await, 0);
    let schedule = services
        .intelligence
        .schedules()
        .await
        .into_iter()
        .find(|s| s.id == id)
        .expect("schedule");
    assert_eq!(schedule.last_generated, Some(now));
}

#[tokio::test]
async fn predictive_analytics_validates_input() {
    let services = services();
    let err = services
        .intelligence
        .get_predictive_analytics(&[], Timeframe::Month, &[])
        .await
        .expect_err("metrics required");
    assert!(matches!(err, AnalyticsError::Validation(_)));

    let err = services
        .intelligence
        .get_predictive_analytics(&["revenue".to_string()], Timeframe::Month, &["wild".to_string()])
        .await
        .expect_err("unknown scenario");
    assert!(matches!(err, AnalyticsError::Validation(_)));

    let analytics = services
        .intelligence
        .get_predictive_analytics(&["revenue".to_string()], Timeframe::Week, &[])
        .await
        .expect("forecast");
    assert_eq!(analytics.horizon_days, 7);
    assert_eq!(analytics.forecasts[0].predicted.len(), 7);
    assert_eq!(analytics.scenarios.len(), 3);
}

#[tokio::test]
async fn data_quality_and_competitive_views_are_available() {
    let services = services();
    let quality = services.intelligence.assess_data_quality().await;
    assert_eq!(quality.sources_assessed, 5);

    let competitive = services
        .intelligence
        .get_competitive_intelligence()
        .await
        .expect("competitive");
    assert_eq!(competitive.market_position.rank, 5);
    assert_eq!(competitive.benchmarking.len(), 2);

    let ai = services
        .intelligence
        .get_ai_insights(&AiInsightContext {
            include_recommendations: true,
            ..AiInsightContext::default()
        })
        .await;
    assert!(ai.anomalies.is_empty());
}

#[tokio::test]
async fn executive_dashboard_splits_the_timeframe() {
    let services = services();
    seed_sessions(&services).await;
    let dashboard = services
        .intelligence
        .get_executive_dashboard(Timeframe::Week, &BehaviorFilters::default())
        .await;
    assert_eq!(dashboard.timeframe, Timeframe::Week);
    let sessions = dashboard
        .kpis
        .iter()
        .find(|k| k.name == "sessions")
        .expect("sessions kpi");
    assert_eq!(sessions.value, 6.0);
    assert_eq!(sessions.previous, 0.0);
    let revenue = dashboard
        .kpis
        .iter()
        .find(|k| k.name == "revenue")
        .expect("revenue kpi");
    assert!((revenue.value - 360.0).abs() < 1e-9);
}
