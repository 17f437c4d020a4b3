use rust_xlsxwriter::Workbook;
use std::fs;

use plansheet::budget::Budget;
use plansheet::expense::{ExpenseLedger, expenses_from_table};
use plansheet::loader::load_table;

#[test]
fn monthly_files_merge_and_compare_with_budget() {
    let dir = tempfile::tempdir().unwrap();

    let february = dir.path().join("february.csv");
    fs::write(
        &february,
        "Date,Category,Amount\n2024-02-03,Groceries,350\n2024-02-10,Fuel,140\n",
    )
    .unwrap();

    // March arrives as a workbook and repeats one February row
    let march = dir.path().join("march.xlsx");
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Date").unwrap();
    sheet.write_string(0, 1, "Category").unwrap();
    sheet.write_string(0, 2, "Amount").unwrap();
    let rows = [
        ("2024-02-03", "Groceries", 350.0),
        ("2024-03-01", "Groceries", 200.0),
        ("2024-03-15", "Groceries", 120.0),
        ("2024-03-04", "Fuel", 130.0),
    ];
    for (i, (date, category, amount)) in rows.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, *date).unwrap();
        sheet.write_string(row, 1, *category).unwrap();
        sheet.write_number(row, 2, *amount).unwrap();
    }
    workbook.save(&march).unwrap();

    let mut ledger = ExpenseLedger::new();
    let mut duplicates = 0;
    for path in [&february, &march] {
        let parsed = expenses_from_table(&load_table(path).unwrap()).unwrap();
        assert_eq!(parsed.skipped, 0);
        duplicates += ledger.merge(parsed.rows).duplicates;
    }
    assert_eq!(duplicates, 1);
    assert_eq!(ledger.len(), 5);
    assert_eq!(ledger.months(), vec!["2024-02", "2024-03"]);
    assert_eq!(ledger.month_total("2024-03"), 450.0);

    let budget_path = dir.path().join("budget.json");
    let mut budget = Budget::load(&budget_path).unwrap();
    budget.set("Groceries", 400.0).unwrap();
    budget.set("Fuel", 120.0).unwrap();
    budget.save(&budget_path).unwrap();

    let budget = Budget::load(&budget_path).unwrap();
    let month = ledger.latest_month().unwrap();
    let messages: Vec<String> = budget
        .compare(&ledger, &month)
        .iter()
        .map(|s| s.message())
        .collect();
    assert_eq!(
        messages,
        vec![
            "Fuel: spent 130.00 of 120.00, over budget by 10.00.".to_string(),
            "Groceries: spent 320.00 of 400.00 (80.00 remaining). Surplus of 50.00 from 2024-02 rolls over."
                .to_string(),
        ]
    );
}
