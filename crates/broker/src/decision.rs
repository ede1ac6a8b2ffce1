//! Pure decision core shared by the browser GET handlers and the
//! gateway-forwarded decision RPC. Callers only differ in how they render
//! the returned [`DecisionResponse`].

use {
    nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    },
    tracing::{info, warn},
};

use larkin_protocol::{
    rpc::{DecisionAction, DecisionResponse},
    socket::{Behavior, Decision},
};

use crate::{
    broker::{RequestBroker, RequestStatus, ResolveError},
    rules::write_always_allow_rule,
};

/// Apply a user action to a pending request.
///
/// Ordering matters: the status check runs before the hook-liveness probe,
/// so a hook that exited right after receiving its decision reports
/// "already handled" instead of a spurious "hook gone".
pub async fn handle_decision(
    broker: &RequestBroker,
    action: DecisionAction,
    request_id: &str,
    project_dir: Option<&str>,
) -> DecisionResponse {
    if request_id.is_empty() {
        return DecisionResponse::refused("缺少请求 ID");
    }

    let Some(data) = broker.request_data(request_id).await else {
        return DecisionResponse::refused("请求不存在或已过期");
    };

    match broker.request_status(request_id).await {
        Some(RequestStatus::Resolved) => {
            return DecisionResponse::refused("请求已被处理，请勿重复操作");
        },
        Some(RequestStatus::Disconnected) => {
            return DecisionResponse::refused("连接已断开，Claude 可能已继续执行其他操作");
        },
        Some(RequestStatus::Pending) | None => {},
    }

    if let Some(pid) = broker.hook_pid(request_id).await
        && kill(Pid::from_raw(pid), None::<Signal>).is_err()
    {
        info!(
            request_id,
            hook_pid = pid,
            session_id = data.session_id,
            "hook process gone, cannot deliver decision"
        );
        return DecisionResponse::refused("无法传递决策：权限请求已超时或被取消，请返回终端查看当前状态");
    }

    let decision = match action {
        DecisionAction::Allow | DecisionAction::Always => Decision::allow(),
        DecisionAction::Deny => Decision::deny("用户拒绝"),
        DecisionAction::Interrupt => Decision::deny_interrupt("用户拒绝并中断"),
    };
    let behavior = decision.behavior;

    // Write the rule before resolving, so a failed write leaves the request
    // pending and the user can retry.
    if action == DecisionAction::Always {
        let rule_dir = project_dir
            .filter(|d| !d.is_empty())
            .unwrap_or(data.project_dir.as_str());
        if let Err(e) = write_always_allow_rule(rule_dir, &data.tool_name, &data.tool_input) {
            warn!(request_id, error = %e, "always-allow rule write failed");
            return DecisionResponse::refused("写入规则失败，请检查项目目录权限后重试");
        }
    }

    info!(
        request_id,
        session_id = data.session_id,
        action = action.as_str(),
        "handling decision"
    );

    if let Err(e) = broker.resolve(request_id, decision).await {
        let message = match e {
            ResolveError::AlreadyResolved(_) => "请求已被处理，请勿重复操作".to_string(),
            other => format!("处理失败: {other}"),
        };
        return DecisionResponse::refused(message);
    }

    DecisionResponse {
        success: true,
        decision: Some(behavior),
        message: success_message(action).to_string(),
    }
}

fn success_message(action: DecisionAction) -> &'static str {
    match action {
        DecisionAction::Allow => "已批准运行",
        DecisionAction::Always => "已始终允许，后续相同操作将自动批准",
        DecisionAction::Deny => "已拒绝运行",
        DecisionAction::Interrupt => "已拒绝并中断",
    }
}
