//! Domain card composers: registration authorization, register status,
//! and the interactive new-session form.

use serde_json::Value;

use {
    larkin_feishu::card::{
        ButtonStyle, Card, Template, button, form, select_static, submit_button, text_input,
    },
    larkin_protocol::{events::CardActionValue, rpc::BrowseDirsResponse},
};

/// Authorization card sent to the owner when a backend asks to bind.
pub fn authorization_card(
    callback_url: &str,
    owner_id: &str,
    client_ip: &str,
    old_callback_url: &str,
    reply_in_thread: bool,
) -> Value {
    let (title, intro) = if old_callback_url.is_empty() {
        (
            "新的 Callback 后端注册请求",
            format!("**Callback URL**: `{callback_url}`\n**来源 IP**: `{client_ip}`"),
        )
    } else {
        (
            "Callback 后端更换设备请求",
            format!(
                "**旧设备**: `{old_callback_url}`\n**新设备**: `{callback_url}`\n**来源 IP**: `{client_ip}`"
            ),
        )
    };
    let question = if old_callback_url.is_empty() {
        "是否允许该后端绑定？"
    } else {
        "是否允许更换到新设备？"
    };
    let content = format!(
        "{intro}\n\n**授权后该后端将获得以下权限：**\n\
         • 接收你发送给机器人的所有消息\n\
         • 向你发送消息通知（如权限请求、任务状态等）\n\n\
         **安全风险提示：**\n\
         • 后端可读取你的对话内容\n\
         • 后端可主动向你推送消息\n\
         • 请确认该后端来源可信后再授权\n\n\
         {question}"
    );

    let approve = CardActionValue::ApproveRegister {
        callback_url: callback_url.to_string(),
        owner_id: owner_id.to_string(),
        request_ip: client_ip.to_string(),
        old_callback_url: old_callback_url.to_string(),
        reply_in_thread,
    };
    let deny = CardActionValue::DenyRegister {
        callback_url: callback_url.to_string(),
        owner_id: owner_id.to_string(),
    };

    Card::new(title, Template::Blue)
        .markdown(content)
        .hr()
        .buttons(vec![
            button("允许", ButtonStyle::Primary, &approve),
            button("拒绝", ButtonStyle::Danger, &deny),
        ])
        .build()
}

/// "Approved" replacement card, with an unbind escape hatch.
pub fn approved_card(callback_url: &str, owner_id: &str, client_ip: &str) -> Value {
    let unbind = CardActionValue::UnbindRegister {
        callback_url: callback_url.to_string(),
        owner_id: owner_id.to_string(),
    };
    Card::new("✓ 已授权", Template::Green)
        .markdown(format!(
            "**Callback URL**: `{callback_url}`\n**来源 IP**: `{client_ip}`\n\n\
             **已授权权限：**\n\
             • 接收你发送给机器人的所有消息\n\
             • 向你发送消息通知\n\n\
             已成功授权该后端"
        ))
        .hr()
        .buttons(vec![button("解绑", ButtonStyle::Danger, &unbind)])
        .build()
}

/// "Denied" replacement card.
pub fn denied_card(callback_url: &str) -> Value {
    Card::new("✗ 已拒绝", Template::Red)
        .markdown(format!(
            "**Callback URL**: `{callback_url}`\n\n已拒绝该后端的注册请求"
        ))
        .build()
}

/// "Unbound" replacement card.
pub fn unbound_card(callback_url: &str) -> Value {
    Card::new("✗ 已解绑", Template::Grey)
        .markdown(format!(
            "**Callback URL**: `{callback_url}`\n\n\
             已解除绑定，该后端将：\n\
             • 无法再接收你的消息\n\
             • 无法再向你发送通知"
        ))
        .build()
}

/// Interactive new-session form.
///
/// The directory dropdown lists recent dirs (or, mid-browse, the
/// subdirectories of `browse.current`) next to a free-form path input, an
/// optional command selector, and the prompt box. Browse navigation re-renders
/// this same card.
pub fn new_session_card(
    recent_dirs: &[String],
    browse: Option<&BrowseDirsResponse>,
    commands: &[String],
    prompt_default: &str,
) -> Value {
    let mut elements: Vec<Value> = Vec::new();

    let dir_options: Vec<(String, String)> = match browse {
        Some(listing) => listing
            .dirs
            .iter()
            .map(|d| (d.clone(), d.clone()))
            .collect(),
        None => recent_dirs.iter().map(|d| (d.clone(), d.clone())).collect(),
    };
    let placeholder = match browse {
        Some(listing) => format!("选择 {} 下的子目录", listing.current),
        None => "选择最近使用的目录".to_string(),
    };
    if !dir_options.is_empty() {
        elements.push(select_static("dir", &placeholder, &dir_options));
    }
    elements.push(text_input("custom_dir", "或输入目录的绝对路径", ""));

    if commands.len() > 1 {
        let command_options: Vec<(String, String)> =
            commands.iter().map(|c| (c.clone(), c.clone())).collect();
        elements.push(select_static("command", "选择 Claude 命令（可选）", &command_options));
    }

    elements.push(text_input("prompt", "想让 Claude 做什么？", prompt_default));
    elements.push(submit_button(
        "创建会话",
        ButtonStyle::Primary,
        &CardActionValue::NewSubmit {},
    ));

    let mut card = Card::new("新建 Claude 会话", Template::Blue).element(form(elements));

    // Browse navigation rides outside the form so clicks don't submit it.
    let browse_root = browse.map_or("/", |l| l.current.as_str());
    let mut nav = vec![button(
        "浏览目录",
        ButtonStyle::Default,
        &CardActionValue::NewBrowse {
            path: browse_root.to_string(),
        },
    )];
    if let Some(listing) = browse
        && !listing.parent.is_empty()
    {
        nav.push(button(
            "上级目录",
            ButtonStyle::Default,
            &CardActionValue::NewBrowse {
                path: listing.parent.clone(),
            },
        ));
    }
    card = card.hr().buttons(nav);
    card.build()
}

/// Placeholder swapped in while the launch RPC runs.
pub fn creating_card(project_dir: &str, prompt: &str) -> Value {
    Card::new("⏳ 正在创建会话", Template::Blue)
        .markdown(format!(
            "**目录**: `{project_dir}`\n**任务**: {prompt}\n\n正在启动 Claude，请稍候..."
        ))
        .build()
}
