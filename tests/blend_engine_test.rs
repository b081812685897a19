// ==========================================
// 混酿引擎测试
// ==========================================
// 测试范围:
// 1. 批次贡献并入既有目标单元的完整落库效果
// 2. 容量复检在任何写入之前 (超限零副作用)
// 3. 双重血缘保留、百分比重算、混酿编号
// ==========================================

mod test_helpers;

use brewery_lot_engine::domain::types::{BatchStatus, LotPhase, TransitionMode};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use test_helpers::*;

/// 混酿场景: 批次 B1 的 L1 (300L) 在 T4 发酵中,
/// 目标单元 L2 (400L) 属于批次 B2,在 T5 (容量可调) 后熟中
fn seed_blend_scenario(conn: &Arc<Mutex<Connection>>, t5_capacity_l: f64) {
    let guard = conn.lock().unwrap();

    insert_batch(&guard, &make_batch("B1", "IPA-2607"));
    insert_lot(&guard, &make_lot("L1", "IPA-2607", 300.0));
    insert_lot_batch(&guard, &make_lot_batch("LB1", "L1", "B1", 300.0));

    let mut t4 = make_tank("T4", "FV-04", 1000.0);
    t4.status = brewery_lot_engine::domain::types::TankStatus::Occupied;
    t4.current_lot_id = Some("L1".to_string());
    t4.current_phase = Some(LotPhase::Fermentation);
    insert_tank(&guard, &t4);
    insert_assignment(&guard, &make_fermentation_assignment("A4", "T4", "L1", 300.0));

    let mut b2 = make_batch("B2", "STOUT-2606");
    b2.status = BatchStatus::Conditioning;
    insert_batch(&guard, &b2);
    let mut l2 = make_lot("L2", "STOUT-2606", 400.0);
    l2.phase = LotPhase::Conditioning;
    insert_lot(&guard, &l2);
    insert_lot_batch(&guard, &make_lot_batch("LB2", "L2", "B2", 400.0));

    let mut t5 = make_tank("T5", "CT-05", t5_capacity_l);
    t5.status = brewery_lot_engine::domain::types::TankStatus::Occupied;
    t5.current_lot_id = Some("L2".to_string());
    t5.current_phase = Some(LotPhase::Conditioning);
    insert_tank(&guard, &t5);
    let mut a5 = make_fermentation_assignment("A5", "T5", "L2", 400.0);
    a5.phase = LotPhase::Conditioning;
    insert_assignment(&guard, &a5);
}

fn query_one<T: rusqlite::types::FromSql>(conn: &Arc<Mutex<Connection>>, sql: &str) -> T {
    let guard = conn.lock().unwrap();
    guard.query_row(sql, [], |row| row.get(0)).expect("查询失败")
}

fn blend_request() -> brewery_lot_engine::engine::mode_resolver::TransitionRequest {
    let mut request = base_request("B1");
    request.enable_blend = true;
    request.blend_target_lot_id = Some("L2".to_string());
    request
}

// ==========================================
// 场景 4: 混酿
// ==========================================

#[test]
fn test_blend_merges_batch_into_target_lot() {
    let (_tmp, conn) = setup_test_db();
    seed_blend_scenario(&conn, 1000.0);
    let api = build_api(conn.clone());

    let response = api.execute_transition(&blend_request()).expect("混酿失败");
    assert_eq!(response.mode, TransitionMode::Blend);
    assert_eq!(response.lot.lot_id, "L2");
    assert!(response.lot.is_blend_target);
    assert!(response.lot.lot_code.starts_with("BLEND-"));
    assert!(response.lot.blended_at.is_some());
    // 混酿不开新占用
    assert!(response.new_assignments.is_empty());

    // 新关联行 B1 → L2,贡献 300L
    let new_link_volume: f64 = query_one(
        &conn,
        "SELECT volume_l FROM lot_batch WHERE lot_id = 'L2' AND batch_id = 'B1'",
    );
    assert_eq!(new_link_volume, 300.0);

    // 目标单元内百分比重算: 400/700 与 300/700,合计 100
    let b2_pct: f64 = query_one(
        &conn,
        "SELECT percentage FROM lot_batch WHERE lot_id = 'L2' AND batch_id = 'B2'",
    );
    let b1_pct: f64 = query_one(
        &conn,
        "SELECT percentage FROM lot_batch WHERE lot_id = 'L2' AND batch_id = 'B1'",
    );
    assert!((b2_pct - 400.0 / 700.0 * 100.0).abs() < 1e-9);
    assert!((b1_pct - 300.0 / 700.0 * 100.0).abs() < 1e-9);
    let pct_sum: f64 = query_one(
        &conn,
        "SELECT SUM(percentage) FROM lot_batch WHERE lot_id = 'L2'",
    );
    assert!((pct_sum - 100.0).abs() < 1e-9);

    // 目标占用吸收追加体积,不开新占用
    let a5_volume: f64 = query_one(
        &conn,
        "SELECT planned_volume_l FROM tank_assignment WHERE assignment_id = 'A5'",
    );
    assert_eq!(a5_volume, 700.0);
    let t5_assignment_count: i64 = query_one(
        &conn,
        "SELECT COUNT(*) FROM tank_assignment WHERE tank_id = 'T5'",
    );
    assert_eq!(t5_assignment_count, 1);

    // 来源发酵占用关闭,罐体释放
    let (a4_status, a4_actual_end): (String, String) = {
        let guard = conn.lock().unwrap();
        guard
            .query_row(
                "SELECT status, actual_end FROM tank_assignment WHERE assignment_id = 'A4'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap()
    };
    assert_eq!(a4_status, "COMPLETED");
    assert_eq!(a4_actual_end, "2026-03-10 08:00:00");
    let t4_status: String = query_one(&conn, "SELECT status FROM tank WHERE tank_id = 'T4'");
    assert_eq!(t4_status, "NEEDS_CLEANING");

    // 双重血缘: 来源单元完结,但其历史关联行保留
    let l1_status: String = query_one(&conn, "SELECT status FROM lot WHERE lot_id = 'L1'");
    assert_eq!(l1_status, "COMPLETED");
    let historical_link: i64 = query_one(
        &conn,
        "SELECT COUNT(*) FROM lot_batch WHERE lot_id = 'L1' AND batch_id = 'B1'",
    );
    assert_eq!(historical_link, 1);

    // 移动批次派生状态推进到后熟
    let b1_status: String = query_one(&conn, "SELECT status FROM batch WHERE batch_id = 'B1'");
    assert_eq!(b1_status, "CONDITIONING");

    // 流水: 来源罐到目标罐
    let transfer_count: i64 = query_one(
        &conn,
        "SELECT COUNT(*) FROM transfer_log WHERE mode = 'BLEND' \
         AND source_tank_id = 'T4' AND dest_tank_id = 'T5' AND volume_l = 300.0",
    );
    assert_eq!(transfer_count, 1);
}

#[test]
fn test_blend_keeps_existing_blend_code() {
    let (_tmp, conn) = setup_test_db();
    seed_blend_scenario(&conn, 1000.0);
    let api = build_api(conn.clone());

    api.execute_transition(&blend_request()).expect("首次混酿失败");
    let code_after_first: String =
        query_one(&conn, "SELECT lot_code FROM lot WHERE lot_id = 'L2'");
    assert!(code_after_first.starts_with("BLEND-"));

    // 第三个批次再并入同一目标: 编号不再变化
    {
        let guard = conn.lock().unwrap();
        insert_batch(&guard, &make_batch("B3", "PALE-2608"));
        insert_lot(&guard, &make_lot("L3", "PALE-2608", 100.0));
        insert_lot_batch(&guard, &make_lot_batch("LB3", "L3", "B3", 100.0));
        insert_tank(&guard, &make_tank("T6", "FV-06", 500.0));
        insert_assignment(&guard, &make_fermentation_assignment("A6", "T6", "L3", 100.0));
    }
    let mut request = base_request("B3");
    request.enable_blend = true;
    request.blend_target_lot_id = Some("L2".to_string());
    api.execute_transition(&request).expect("二次混酿失败");

    let code_after_second: String =
        query_one(&conn, "SELECT lot_code FROM lot WHERE lot_id = 'L2'");
    assert_eq!(code_after_first, code_after_second);

    // 三个批次的百分比合计仍为 100
    let pct_sum: f64 = query_one(
        &conn,
        "SELECT SUM(percentage) FROM lot_batch WHERE lot_id = 'L2'",
    );
    assert!((pct_sum - 100.0).abs() < 1e-9);
}

// ==========================================
// 失败路径
// ==========================================

#[test]
fn test_blend_overflow_aborts_before_any_write() {
    let (_tmp, conn) = setup_test_db();
    // 容量 650: 400 + 300 超限
    seed_blend_scenario(&conn, 650.0);
    let api = build_api(conn.clone());

    let err = api.execute_transition(&blend_request()).unwrap_err();
    assert_eq!(err.code(), "TANK_OVERFLOW");

    // 零副作用: 来源占用未关闭、来源单元未完结、无新关联行、编号未变
    let a4_status: String = query_one(
        &conn,
        "SELECT status FROM tank_assignment WHERE assignment_id = 'A4'",
    );
    assert_eq!(a4_status, "ACTIVE");
    let l1_status: String = query_one(&conn, "SELECT status FROM lot WHERE lot_id = 'L1'");
    assert_eq!(l1_status, "ACTIVE");
    let l2_links: i64 = query_one(
        &conn,
        "SELECT COUNT(*) FROM lot_batch WHERE lot_id = 'L2'",
    );
    assert_eq!(l2_links, 1);
    let l2_code: String = query_one(&conn, "SELECT lot_code FROM lot WHERE lot_id = 'L2'");
    assert_eq!(l2_code, "STOUT-2606");
}

#[test]
fn test_blend_target_not_found() {
    let (_tmp, conn) = setup_test_db();
    seed_blend_scenario(&conn, 1000.0);
    let api = build_api(conn);

    let mut request = blend_request();
    request.blend_target_lot_id = Some("NO-SUCH-LOT".to_string());

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "LOT_NOT_FOUND");
}

#[test]
fn test_blend_into_completed_target_rejected() {
    let (_tmp, conn) = setup_test_db();
    seed_blend_scenario(&conn, 1000.0);
    {
        let guard = conn.lock().unwrap();
        guard
            .execute("UPDATE lot SET status = 'COMPLETED' WHERE lot_id = 'L2'", [])
            .unwrap();
    }
    let api = build_api(conn);

    let err = api.execute_transition(&blend_request()).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[test]
fn test_blend_target_without_active_assignment_rejected() {
    let (_tmp, conn) = setup_test_db();
    seed_blend_scenario(&conn, 1000.0);
    {
        // 目标占用不再进行中
        let guard = conn.lock().unwrap();
        guard
            .execute(
                "UPDATE tank_assignment SET status = 'COMPLETED' WHERE assignment_id = 'A5'",
                [],
            )
            .unwrap();
    }
    let api = build_api(conn.clone());

    let err = api.execute_transition(&blend_request()).unwrap_err();
    assert_eq!(err.code(), "TANKS_UNAVAILABLE");

    // 零副作用
    let a4_status: String = query_one(
        &conn,
        "SELECT status FROM tank_assignment WHERE assignment_id = 'A4'",
    );
    assert_eq!(a4_status, "ACTIVE");
}
