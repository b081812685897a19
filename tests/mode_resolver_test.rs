// ==========================================
// 流转模式解析测试
// ==========================================
// 测试范围:
// 1. 标志矛盾组合显式报错
// 2. 模式优先级 (原罐转相 > 混酿 > 转移/分罐 > 无可用罐体)
// 3. 来源单元的图谱消歧 (父/子/叶子/新建)
// ==========================================

mod test_helpers;

use brewery_lot_engine::domain::types::{LotPhase, LotStatus, TankStatus, TransitionMode};
use brewery_lot_engine::engine::mode_resolver::TankAllocation;
use test_helpers::*;

// ==========================================
// 标志矛盾
// ==========================================

#[test]
fn test_keep_same_tank_and_blend_conflict() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.keep_same_tank = true;
    request.enable_blend = true;
    request.blend_target_lot_id = Some("L2".to_string());

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "CONFLICTING_FLAGS");
}

#[test]
fn test_keep_same_tank_and_split_conflict() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.keep_same_tank = true;
    request.is_split = true;
    request.allocations = vec![
        TankAllocation { tank_id: "T2".to_string(), volume_l: 200.0 },
        TankAllocation { tank_id: "T3".to_string(), volume_l: 300.0 },
    ];

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "CONFLICTING_FLAGS");
}

#[test]
fn test_blend_and_split_conflict() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.enable_blend = true;
    request.blend_target_lot_id = Some("L2".to_string());
    request.is_split = true;

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "CONFLICTING_FLAGS");
}

#[test]
fn test_blend_without_target_rejected() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.enable_blend = true;

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[test]
fn test_multiple_allocations_require_split_flag() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.allocations = vec![
        TankAllocation { tank_id: "T2".to_string(), volume_l: 200.0 },
        TankAllocation { tank_id: "T3".to_string(), volume_l: 300.0 },
    ];

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[test]
fn test_split_requires_at_least_two_allocations() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.is_split = true;
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 500.0,
    }];

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

// ==========================================
// 优先级与兜底
// ==========================================

#[test]
fn test_no_tanks_supplied() {
    let (_tmp, conn) = setup_test_db();
    {
        let guard = conn.lock().unwrap();
        insert_batch(&guard, &make_batch("B1", "IPA-2607"));
    }
    let api = build_api(conn);

    let request = base_request("B1");
    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "TANKS_UNAVAILABLE");
}

#[test]
fn test_batch_not_found() {
    let (_tmp, conn) = setup_test_db();
    let api = build_api(conn);

    let mut request = base_request("NO-SUCH-BATCH");
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 100.0,
    }];

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "BATCH_NOT_FOUND");
}

#[test]
fn test_keep_same_tank_wins_over_allocations() {
    let (_tmp, conn) = setup_test_db();
    {
        let guard = conn.lock().unwrap();
        insert_batch(&guard, &make_batch("B1", "IPA-2607"));
        insert_lot(&guard, &make_lot("L1", "IPA-2607", 500.0));
        insert_lot_batch(&guard, &make_lot_batch("LB1", "L1", "B1", 500.0));

        let mut t1 = make_tank("T1", "FV-01", 1000.0);
        t1.status = TankStatus::Occupied;
        t1.current_lot_id = Some("L1".to_string());
        t1.current_phase = Some(LotPhase::Fermentation);
        insert_tank(&guard, &t1);
        insert_tank(&guard, &make_tank("T2", "CT-02", 1000.0));
        insert_assignment(&guard, &make_fermentation_assignment("A1", "T1", "L1", 500.0));
    }
    let api = build_api(conn.clone());

    // 同时给出保持原罐与分配列表: 原罐转相优先,分配被忽略
    let mut request = base_request("B1");
    request.keep_same_tank = true;
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 500.0,
    }];

    let response = api.execute_transition(&request).expect("流转失败");
    assert_eq!(response.mode, TransitionMode::StayInTank);
    assert_eq!(response.new_assignments.len(), 1);
    assert_eq!(response.new_assignments[0].tank_id, "T1");

    // T2 未被触碰
    let guard = conn.lock().unwrap();
    let t2_assignments: i64 = guard
        .query_row(
            "SELECT COUNT(*) FROM tank_assignment WHERE tank_id = 'T2'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(t2_assignments, 0);
}

#[test]
fn test_keep_same_tank_without_active_assignment_falls_through() {
    let (_tmp, conn) = setup_test_db();
    {
        let guard = conn.lock().unwrap();
        insert_batch(&guard, &make_batch("B1", "IPA-2607"));
        insert_lot(&guard, &make_lot("L1", "IPA-2607", 500.0));
        insert_lot_batch(&guard, &make_lot_batch("LB1", "L1", "B1", 500.0));
        insert_tank(&guard, &make_tank("T2", "CT-02", 1000.0));
        // L1 没有 ACTIVE 发酵占用
    }
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.keep_same_tank = true;
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 500.0,
    }];

    let response = api.execute_transition(&request).expect("流转失败");
    assert_eq!(response.mode, TransitionMode::DirectTransfer);
    assert_eq!(response.new_assignments[0].tank_id, "T2");
}

// ==========================================
// 来源单元消歧
// ==========================================

/// 父单元带两个未处理发酵子单元的场景
fn seed_parent_with_children(conn: &std::sync::Arc<std::sync::Mutex<rusqlite::Connection>>) {
    let guard = conn.lock().unwrap();
    insert_batch(&guard, &make_batch("B1", "IPA-2607"));

    let mut parent = make_lot("LP", "IPA-2607", 500.0);
    parent.status = LotStatus::Completed;
    insert_lot(&guard, &parent);

    let mut child_a = make_lot("LCA", "IPA-2607-A", 200.0);
    child_a.parent_lot_id = Some("LP".to_string());
    insert_lot(&guard, &child_a);
    let mut child_b = make_lot("LCB", "IPA-2607-B", 300.0);
    child_b.parent_lot_id = Some("LP".to_string());
    insert_lot(&guard, &child_b);

    insert_lot_batch(&guard, &make_lot_batch("LB-P", "LP", "B1", 500.0));
    insert_lot_batch(&guard, &make_lot_batch("LB-A", "LCA", "B1", 200.0));
    insert_lot_batch(&guard, &make_lot_batch("LB-B", "LCB", "B1", 300.0));

    insert_tank(&guard, &make_tank("T2", "CT-02", 1000.0));
    insert_tank(&guard, &make_tank("T3", "CT-03", 1000.0));
}

#[test]
fn test_explicit_parent_operates_on_first_child() {
    let (_tmp, conn) = setup_test_db();
    seed_parent_with_children(&conn);
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.source_lot_id = Some("LP".to_string());
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 200.0,
    }];

    // 未指定子单元: 取编号最小者 (IPA-2607-A)
    let response = api.execute_transition(&request).expect("流转失败");
    assert_eq!(response.lot.lot_id, "LCA");
    assert_eq!(response.lot.phase, LotPhase::Conditioning);
}

#[test]
fn test_explicit_parent_with_named_child() {
    let (_tmp, conn) = setup_test_db();
    seed_parent_with_children(&conn);
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.source_lot_id = Some("LP".to_string());
    request.child_lot_id = Some("LCB".to_string());
    request.allocations = vec![TankAllocation {
        tank_id: "T3".to_string(),
        volume_l: 300.0,
    }];

    let response = api.execute_transition(&request).expect("流转失败");
    assert_eq!(response.lot.lot_id, "LCB");
}

#[test]
fn test_named_child_outside_pending_set_rejected() {
    let (_tmp, conn) = setup_test_db();
    seed_parent_with_children(&conn);
    let api = build_api(conn);

    let mut request = base_request("B1");
    request.source_lot_id = Some("LP".to_string());
    request.child_lot_id = Some("NOT-A-CHILD".to_string());
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 200.0,
    }];

    let err = api.execute_transition(&request).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[test]
fn test_sibling_children_resolved_without_source_lot() {
    let (_tmp, conn) = setup_test_db();
    seed_parent_with_children(&conn);
    {
        // 结构父单元回到在产状态,验证最后一个子单元处理完后被完结
        let guard = conn.lock().unwrap();
        guard
            .execute("UPDATE lot SET status = 'ACTIVE' WHERE lot_id = 'LP'", [])
            .unwrap();
    }
    let api = build_api(conn.clone());

    // 第一次调用: 处理编号最小的子单元 LCA
    let mut request = base_request("B1");
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 200.0,
    }];
    let response = api.execute_transition(&request).expect("第一次流转失败");
    assert_eq!(response.lot.lot_id, "LCA");

    // 父单元仍有未处理子单元,不应完结
    {
        let guard = conn.lock().unwrap();
        let status: String = guard
            .query_row("SELECT status FROM lot WHERE lot_id = 'LP'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(status, "ACTIVE");
    }

    // 第二次调用: 处理 LCB,父单元随之完结
    let mut request = base_request("B1");
    request.allocations = vec![TankAllocation {
        tank_id: "T3".to_string(),
        volume_l: 300.0,
    }];
    let response = api.execute_transition(&request).expect("第二次流转失败");
    assert_eq!(response.lot.lot_id, "LCB");

    let guard = conn.lock().unwrap();
    let status: String = guard
        .query_row("SELECT status FROM lot WHERE lot_id = 'LP'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(status, "COMPLETED");
}

#[test]
fn test_fresh_lot_created_when_batch_has_none() {
    let (_tmp, conn) = setup_test_db();
    {
        let guard = conn.lock().unwrap();
        insert_batch(&guard, &make_batch("B1", "IPA-2607"));
        insert_tank(&guard, &make_tank("T2", "CT-02", 1000.0));
    }
    let api = build_api(conn.clone());

    let mut request = base_request("B1");
    request.allocations = vec![TankAllocation {
        tank_id: "T2".to_string(),
        volume_l: 400.0,
    }];

    let response = api.execute_transition(&request).expect("流转失败");
    assert_eq!(response.mode, TransitionMode::DirectTransfer);
    assert_eq!(response.lot.lot_code, "IPA-2607");
    assert_eq!(response.lot.phase, LotPhase::Conditioning);
    assert_eq!(response.lot.status, LotStatus::Active);

    // 新单元带 100% 的批次关联行
    let guard = conn.lock().unwrap();
    let (volume, percentage): (f64, f64) = guard
        .query_row(
            "SELECT volume_l, percentage FROM lot_batch WHERE batch_id = 'B1'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(volume, 400.0);
    assert_eq!(percentage, 100.0);
}
