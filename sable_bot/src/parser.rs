use crate::*;

/// Turns raw protocol lines into [`Event`]s.
///
/// The main loop catches any `ParseError`, logs it along with the line, and carries on.
pub trait Parser: Send {
    fn to_event(&mut self, raw: &str) -> Result<Event, ParseError>;
}

impl<F> Parser for F
where
    F: FnMut(&str) -> Result<Event, ParseError> + Send,
{
    fn to_event(&mut self, raw: &str) -> Result<Event, ParseError> {
        self(raw)
    }
}

/// A tokenised, but not yet interpreted, line from the server
#[derive(Debug)]
struct RawMessage<'a> {
    tags: Vec<Tag>,
    prefix: Option<&'a str>,
    command: &'a str,
    args: Vec<&'a str>,
}

fn is_channel_name(name: &str) -> bool {
    name.starts_with(['#', '&', '+', '!'])
}

fn parse_prefix(prefix: &str) -> Sender {
    let (nick_user, address) = match prefix.split_once('@') {
        Some((nu, host)) => (nu, Some(host.to_string())),
        None => (prefix, None),
    };
    let (nickname, ident) = match nick_user.split_once('!') {
        Some((nick, user)) => (nick, Some(user.to_string())),
        None => (nick_user, None),
    };

    Sender {
        nickname: nickname.to_string(),
        ident,
        address,
    }
}

fn tokenise(line: &str) -> Result<RawMessage<'_>, ParseError> {
    let mut tags = Vec::new();
    let mut prefix = None;

    let mut raw = line.trim_start();
    if raw.is_empty() {
        return Err(ParseError::new("Empty line", line));
    }

    if let Some(tag_str) = raw.strip_prefix('@') {
        let Some(space_offset) = tag_str.find(' ') else {
            return Err(ParseError::new("Message tags without a command", line));
        };

        for tag_def in tag_str[..space_offset].split(';') {
            let (name, value) = match tag_def.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (tag_def.to_string(), None),
            };

            tags.push(Tag { name, value });
        }

        raw = tag_str[space_offset..].trim_start();
    }

    if let Some(prefix_str) = raw.strip_prefix(':') {
        let Some(space_offset) = prefix_str.find(' ') else {
            return Err(ParseError::new("Prefix without a command", line));
        };
        prefix = Some(&prefix_str[..space_offset]);
        raw = prefix_str[space_offset..].trim_start();
    }

    if raw.is_empty() {
        return Err(ParseError::new("Missing command", line));
    }

    let (command, mut rest) = match raw.find(' ') {
        Some(offset) => (&raw[..offset], &raw[offset + 1..]),
        None => (raw, ""),
    };

    let mut args = Vec::new();
    loop {
        if let Some(arg) = rest.strip_prefix(':') {
            args.push(arg);
            break;
        }

        match rest.find(' ') {
            Some(offset) => {
                let arg = &rest[..offset];

                if !arg.is_empty() {
                    args.push(arg);
                }

                rest = &rest[offset + 1..];
            }
            None => {
                if !rest.is_empty() {
                    args.push(rest);
                }
                break;
            }
        }
    }

    Ok(RawMessage {
        tags,
        prefix,
        command,
        args,
    })
}

/// The built-in parser for RFC 1459 / IRCv3 formatted lines
#[derive(Debug, Default)]
pub struct IrcParser;

impl IrcParser {
    pub fn new() -> Self {
        Self
    }

    fn interpret(line: &str, msg: RawMessage<'_>) -> Result<Event, ParseError> {
        let numeric = msg.command.len() == 3 && msg.command.bytes().all(|b| b.is_ascii_digit());

        let event_type = if numeric {
            let num = msg
                .command
                .parse()
                .map_err(|_| ParseError::new("Bad numeric", line))?;
            EventType::from_numeric(num)
        } else {
            EventType::from_command(msg.command)
        };

        let mut event = Event::new(event_type, line);
        event.tags = msg.tags;
        event.sender = msg.prefix.map(parse_prefix);

        let args = msg.args;
        let arg = |n: usize| args.get(n).map(|s| s.to_string());
        let place = |event: &mut Event, name: Option<String>| match name {
            Some(n) if is_channel_name(&n) => event.channel = Some(n),
            other => event.target = other,
        };

        if numeric {
            event.num = msg.command.parse().unwrap_or_default();
            event.target = arg(0);
            if args.len() > 1 {
                event.content = args[args.len() - 1].to_string();
                event.aux = args[1..args.len() - 1].iter().map(|s| s.to_string()).collect();
            }
            return Ok(event);
        }

        match event_type {
            EventType::Privmsg | EventType::Notice | EventType::Tagmsg => {
                place(&mut event, arg(0));
                event.content = arg(1).unwrap_or_default();
            }
            EventType::Join => {
                event.channel = arg(0);
                event.aux = args.iter().skip(1).map(|s| s.to_string()).collect();
            }
            EventType::Part | EventType::Topic => {
                event.channel = arg(0);
                event.content = arg(1).unwrap_or_default();
            }
            EventType::Kick => {
                event.channel = arg(0);
                event.target = arg(1);
                event.content = arg(2).unwrap_or_default();
            }
            EventType::Mode => {
                place(&mut event, arg(0));
                event.aux = args.iter().skip(1).map(|s| s.to_string()).collect();
            }
            EventType::Invite => {
                event.target = arg(0);
                event.channel = arg(1);
            }
            _ => {
                if let Some((last, rest)) = args.split_last() {
                    event.content = last.to_string();
                    event.aux = rest.iter().map(|s| s.to_string()).collect();
                }
            }
        }

        Ok(event)
    }
}

impl Parser for IrcParser {
    fn to_event(&mut self, raw: &str) -> Result<Event, ParseError> {
        let line = raw.trim_end_matches(['\r', '\n']);
        let msg = tokenise(line)?;
        Self::interpret(line, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Event {
        IrcParser::new().to_event(line).unwrap()
    }

    #[test]
    fn no_args() {
        let msg = tokenise("command").unwrap();
        assert_eq!(msg.command, "command");
        assert_eq!(msg.args.len(), 0);
    }

    #[test]
    fn simple_args() {
        let msg = tokenise("command arg1 arg2 :arg three").unwrap();

        assert_eq!(msg.command, "command");
        assert_eq!(msg.args, &["arg1", "arg2", "arg three"]);
    }

    #[test]
    fn ending_space() {
        let msg = tokenise("command arg1 arg2 ").unwrap();
        assert_eq!(msg.args, &["arg1", "arg2"]);
    }

    #[test]
    fn ending_colon() {
        let msg = tokenise("command arg1 arg2 :").unwrap();
        assert_eq!(msg.args, &["arg1", "arg2", ""]);
    }

    #[test]
    fn double_space() {
        let msg = tokenise("command arg1  arg2").unwrap();
        assert_eq!(msg.args, &["arg1", "arg2"]);
    }

    #[test]
    fn empty() {
        assert!(IrcParser::new().to_event("").is_err());
        assert!(IrcParser::new().to_event("\r\n").is_err());
    }

    #[test]
    fn tags_without_command() {
        let err = IrcParser::new().to_event("@tag1;tag2=val").unwrap_err();
        assert_eq!(err.line, "@tag1;tag2=val");
    }

    #[test]
    fn prefix_without_command() {
        assert!(IrcParser::new().to_event(":irc.example.net").is_err());
    }

    #[test]
    fn tags_and_prefix() {
        let ev = parse("@time=2023-01-01T00:00:00Z;bot :alice!al@host.example PRIVMSG #sable :hello there\r\n");

        assert_eq!(ev.event_type, EventType::Privmsg);
        assert_eq!(ev.tags.len(), 2);
        assert_eq!(ev.tag("bot").unwrap().value, None);
        assert_eq!(
            ev.sender,
            Some(Sender {
                nickname: "alice".to_string(),
                ident: Some("al".to_string()),
                address: Some("host.example".to_string()),
            })
        );
        assert_eq!(ev.channel.as_deref(), Some("#sable"));
        assert_eq!(ev.target, None);
        assert_eq!(ev.content, "hello there");
        assert_eq!(ev.raw, "@time=2023-01-01T00:00:00Z;bot :alice!al@host.example PRIVMSG #sable :hello there");
    }

    #[test]
    fn direct_message() {
        let ev = parse(":alice PRIVMSG sablebot :hi");
        assert_eq!(ev.channel, None);
        assert_eq!(ev.target.as_deref(), Some("sablebot"));
        assert_eq!(ev.reply_target(), Some("alice"));
    }

    #[test]
    fn ping() {
        let ev = parse("PING :irc.example.net");
        assert_eq!(ev.event_type, EventType::Ping);
        assert_eq!(ev.content, "irc.example.net");
        assert!(ev.sender.is_none());
    }

    #[test]
    fn numerics() {
        let ev = parse(":irc.example.net 001 sablebot :Welcome to the network");
        assert_eq!(ev.event_type, EventType::Welcome);
        assert_eq!(ev.num, 1);
        assert_eq!(ev.target.as_deref(), Some("sablebot"));
        assert_eq!(ev.content, "Welcome to the network");

        let ev = parse(":irc.example.net 433 * sablebot :Nickname is already in use");
        assert_eq!(ev.event_type, EventType::NicknameInUse);
        assert_eq!(ev.aux, &["sablebot"]);

        let ev = parse(":irc.example.net 353 sablebot = #sable :alice bob");
        assert_eq!(ev.event_type, EventType::Numeric);
        assert_eq!(ev.num, 353);
    }

    #[test]
    fn kick() {
        let ev = parse(":op!o@h KICK #sable sablebot :bye");
        assert_eq!(ev.event_type, EventType::Kick);
        assert_eq!(ev.channel.as_deref(), Some("#sable"));
        assert_eq!(ev.target.as_deref(), Some("sablebot"));
        assert_eq!(ev.content, "bye");
    }

    #[test]
    fn unknown_command() {
        let ev = parse(":irc.example.net WALLOPS :something");
        assert_eq!(ev.event_type, EventType::Unknown);
        assert_eq!(ev.content, "something");
    }
}
