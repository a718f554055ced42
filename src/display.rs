use crate::avp::Avp;
use crate::message::Message;
use crate::node::Node;
use std::fmt;

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let request_flag = if self.is_request() { "Request" } else { "Answer" };
        let proxyable_flag = if self.is_proxyable() { " Proxyable" } else { "" };
        let error_flag = if self.is_error() { " Error" } else { "" };
        let retransmit_flag = if self.is_retransmission() {
            " Retransmit"
        } else {
            ""
        };

        writeln!(
            f,
            "cmd={} app={} {}{}{}{} hop-by-hop=0x{:08X} end-to-end=0x{:08X}",
            self.cmd_code,
            self.app_id,
            request_flag,
            proxyable_flag,
            error_flag,
            retransmit_flag,
            self.hop_by_hop,
            self.end_to_end
        )?;
        writeln!(
            f,
            "  {:<32} {:>8} {:>5}  {} {} {}  {:<16}  {}",
            "AVP", "Vendor", "Code", "V", "M", "P", "Type", "Value"
        )?;

        for avp in &self.avps {
            writeln!(f, "{}", avp)?;
        }

        Ok(())
    }
}

impl fmt::Display for Avp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            format!("Unknown <{}>", self.code)
        } else {
            self.name.clone()
        };
        let vendor = if self.vendor_id != 0 {
            self.vendor_id.to_string()
        } else {
            String::new()
        };
        let value = match &self.data {
            Some(data) => data.value.to_string(),
            None => String::new(),
        };

        write!(
            f,
            "  {:<32} {:>8} {:>5}  {} {} {}  {:<16}  {}",
            name,
            vendor,
            self.code,
            check(self.is_vendor_specific()),
            check(self.is_mandatory()),
            check(self.is_protected()),
            self.avp_type.name(),
            value
        )
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Peer: {}", self.name)?;
        writeln!(f, "  Remote Address: {}", self.route_info.remote_ip)?;
        writeln!(f, "  Local Address: {}", self.route_info.local_ip)?;
        writeln!(f, "  Remote Port: {}", self.remote_port)?;
        writeln!(f, "  Local Port: {}", self.local_port)?;
        writeln!(f, "  Transport: {}", self.transport.name())
    }
}

fn check(v: bool) -> &'static str {
    if v {
        "✓"
    } else {
        "✗"
    }
}

#[cfg(test)]
mod tests {
    use crate::avp::Identity;
    use crate::dictionary::DEFAULT_DICT;
    use crate::message::Message;
    use crate::store::AvpDataStore;

    #[test]
    fn test_message_display_lists_avps() {
        let store = AvpDataStore::new();
        let mut m = Message::new("0", "CE", true, false, &DEFAULT_DICT, &store).unwrap();
        let mut host = DEFAULT_DICT.get_avp("Origin-Host").unwrap();
        host.set_value(Identity::new("lab.example.org").into()).unwrap();
        m.add_avp(host);

        let text = m.to_string();
        assert!(text.contains("cmd=257 app=0 Request"));
        assert!(text.contains("Origin-Host"));
        assert!(text.contains("lab.example.org"));
    }
}
