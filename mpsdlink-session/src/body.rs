use serde_json::{json, Value};
use uuid::Uuid;

use crate::consts::TITLE_ID;
use crate::model::ServerInfo;

/// Builds the full session body a `Create` PUT sends, with the host as
/// `members.me`. Every key and value here is significant for a real
/// Minecraft console client to recognize the session as joinable.
pub fn build_create_body(server: &ServerInfo, host_xuid: &str, member_count: u32) -> Value {
    let rak_net_guid = Uuid::new_v4();
    let subscription_id = Uuid::new_v4();
    let connection_id = Uuid::new_v4();

    json!({
        "properties": {
            "system": {
                "joinRestriction": "followed",
                "readRestriction": "followed",
                "closed": false,
            },
            "custom": custom_properties(server, host_xuid, member_count, rak_net_guid),
        },
        "members": {
            "me": {
                "constants": {
                    "system": {
                        "xuid": host_xuid,
                        "initialize": true,
                    }
                },
                "properties": {
                    "system": {
                        "active": true,
                        "connection": connection_id,
                        "subscription": {
                            "id": subscription_id,
                            "changeTypes": ["everything"],
                        }
                    }
                }
            }
        }
    })
}

/// Body for joining a non-host identity: the same `members.me` shape used
/// standalone, PUT with that member's own authorization header.
pub fn build_join_body() -> Value {
    let subscription_id = Uuid::new_v4();
    let connection_id = Uuid::new_v4();
    json!({
        "members": {
            "me": {
                "properties": {
                    "system": {
                        "active": true,
                        "connection": connection_id,
                        "subscription": {
                            "id": subscription_id,
                            "changeTypes": ["everything"],
                        }
                    }
                }
            }
        }
    })
}

/// Heartbeat replaces only `properties.custom`, refreshing member count and
/// timestamp without touching the session's `members` block.
pub fn build_heartbeat_body(server: &ServerInfo, host_xuid: &str, member_count: u32) -> Value {
    let rak_net_guid = Uuid::new_v4();
    json!({
        "properties": {
            "custom": custom_properties(server, host_xuid, member_count, rak_net_guid),
        }
    })
}

fn custom_properties(server: &ServerInfo, host_xuid: &str, member_count: u32, rak_net_guid: Uuid) -> Value {
    json!({
        "BroadcastSetting": 3,
        "CrossPlayDisabled": false,
        "Joinability": "joinable_by_friends",
        "LanGame": true,
        "MaxMemberCount": server.max_players,
        "MemberCount": member_count,
        "OnlineCrossPlatformGame": true,
        "SupportedConnections": [{
            "ConnectionType": 6,
            "HostIpAddress": server.address,
            "HostPort": server.port,
            "RakNetGUID": rak_net_guid,
        }],
        "TitleId": TITLE_ID,
        "TransportLayer": 0,
        "levelId": "level",
        "hostName": server.host_name,
        "ownerId": host_xuid,
        "rakNetGUID": rak_net_guid,
        "worldName": server.world_name,
        "worldType": "Survival",
        "protocol": server.protocol,
        "version": server.version,
        "lastUpdate": chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_server() -> ServerInfo {
        ServerInfo {
            id: "main-server".into(),
            host_name: "My Server".into(),
            world_name: "world".into(),
            address: "play.example.com".into(),
            port: 19132,
            protocol: 589,
            version: "1.20.40".into(),
            max_players: 40,
        }
    }

    #[test]
    fn create_body_has_required_shape() {
        let body = build_create_body(&sample_server(), "host-xuid", 1);
        assert_eq!(body["properties"]["system"]["joinRestriction"], "followed");
        assert_eq!(body["properties"]["custom"]["MaxMemberCount"], 40);
        assert_eq!(body["properties"]["custom"]["MemberCount"], 1);
        assert_eq!(body["properties"]["custom"]["ownerId"], "host-xuid");
        assert_eq!(body["members"]["me"]["constants"]["system"]["xuid"], "host-xuid");
        assert_eq!(body["members"]["me"]["properties"]["system"]["active"], true);
    }

    #[test]
    fn heartbeat_body_omits_members_block() {
        let body = build_heartbeat_body(&sample_server(), "host-xuid", 2);
        assert!(body.get("members").is_none());
        assert_eq!(body["properties"]["custom"]["MemberCount"], 2);
    }
}
