use pipeline_bridge::{
    store_uploads, BridgeConfig, BridgeRequest, Category, InMemoryBlobStore,
    PipelineBridgeProcessor,
};

const OPPORTUNITIES: &str = "\
Opportunity Name,Account Name,Opportunity Owner,Stage,Type,Created Date,Close Date,Age,Net-New Dollars,Lead Source
Northwind Expansion,Northwind,Avery,Proposal,New Customer,2023-09-12,2024-04-30,210,\"$250,000\",Partner
Contoso Pilot,Contoso,Jordan,Closed Won,New Customer,2023-11-02,2024-03-15,134,\"$180,000\",Web
Fabrikam Rollout,Fabrikam,Avery,Closed Lost,New Customer,2023-10-20,2024-05-31,150,\"$120,000\",Event
Tailspin Platform,Tailspin,Riley,Negotiation,New Customer,2024-01-08,2024-10-15,95,\"$300,000\",Web
Litware Seats,Litware,Jordan,Discovery,New Customer,2024-02-19,2024-06-28,70,\"$90,000\",Outbound
Adatum Renewal,Adatum,Riley,Proposal,Existing Customer,2023-07-01,2024-02-01,300,\"$400,000\",Renewal
";

const HISTORY: &str = "\
Opportunity Name,From Stage,To Stage,Last Modified,Close Date,Amount,Expected Revenue
Northwind Expansion,Discovery,Proposal,2023-12-01,2024-04-30,250000,125000
Contoso Pilot,Proposal,Negotiation,2024-01-20,2024-03-15,180000,144000
Contoso Pilot,Negotiation,Closed Won,2024-03-15,2024-03-15,180000,180000
Fabrikam Rollout,Discovery,Proposal,2023-12-10,2024-11-30,120000,36000
Fabrikam Rollout,Proposal,Negotiation,2024-02-05,2024-05-31,120000,72000
Fabrikam Rollout,Negotiation,Closed Lost,2024-05-20,2024-05-31,120000,0
Tailspin Platform,Discovery,Proposal,2024-01-15,2024-05-15,300000,90000
Tailspin Platform,Proposal,Negotiation,2024-04-02,2024-10-15,300000,180000
";

fn main() -> anyhow::Result<()> {
    let mut store = InMemoryBlobStore::new();
    store_uploads(
        &mut store,
        &[
            ("opportunities.csv", OPPORTUNITIES.as_bytes()),
            ("stage_history.csv", HISTORY.as_bytes()),
        ],
    )?;

    let request = BridgeRequest {
        start_date: "2024-01-01".to_string(),
        end_date: "2024-06-30".to_string(),
        data_file: "opportunities.csv".to_string(),
        history_file: "stage_history.csv".to_string(),
    };
    let bridge = PipelineBridgeProcessor::process_request(&store, &request, &BridgeConfig::default())?;

    println!(
        "Pipeline bridge {} to {} ($M)",
        request.start_date, request.end_date
    );
    for ((label, value), base) in bridge
        .categories
        .iter()
        .zip(&bridge.values)
        .zip(&bridge.cumulative)
    {
        println!("  {:<26} {:>8.2}   (offset {:.2})", label, value, base);
    }

    let rec = &bridge.reconciliation;
    println!(
        "Calculated ending ${:.0}, actual ${:.0}, folded into new pipeline ${:.0}",
        rec.calculated_ending, rec.ending_actual, rec.discrepancy
    );

    for category in Category::ALL {
        let names: Vec<String> = bridge
            .records_of(category)
            .map(|records| {
                records
                    .values()
                    .filter_map(|row| row.get("Opportunity Name"))
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        println!("  {}: {}", category, names.join(", "));
    }

    Ok(())
}
